//! MI line parser
//!
//! One line in, one [`Record`] out. Parsing is a pure function: the same
//! line always produces the same record.

use super::types::{AsyncKind, AsyncRecord, OutOfBand, Record, ResultClass, StreamKind, StreamRecord, Value};

const PROMPT: &str = "(gdb)";

/// Parse one line of MI output
///
/// Lines that match no record shape come back as an empty [`Record`].
/// Use [`parse_record`] to tell those apart from prompts and blank lines.
pub fn parse_line(line: &str) -> Record {
    parse_record(line).unwrap_or_default()
}

/// Parse one line, returning `None` when it matches no MI production
///
/// Prompt lines and blank lines are valid and parse to an empty record.
pub fn parse_record(line: &str) -> Option<Record> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.trim_end() == PROMPT {
        return Some(Record::default());
    }

    let mut cur = Cursor::new(line);
    let token = cur.token();
    let marker = cur.bump()?;
    let mut record = Record {
        token,
        ..Record::default()
    };

    match marker {
        '^' => {
            let class = cur.class();
            record.result_class = Some(ResultClass::from_name(class)?);
            record.results = cur.results()?;
        }
        '*' | '=' | '+' => {
            let kind = match marker {
                '*' => AsyncKind::Exec,
                '=' => AsyncKind::Notify,
                _ => AsyncKind::Status,
            };
            let async_class = cur.class();
            if async_class.is_empty() {
                return None;
            }
            let async_class = async_class.to_string();
            let output = cur.results()?;
            record.out_of_band.push(OutOfBand::Async(AsyncRecord {
                kind,
                async_class,
                output,
            }));
        }
        '~' | '@' | '&' => {
            let kind = match marker {
                '~' => StreamKind::Console,
                '@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            let content = cur.c_string()?;
            record.out_of_band.push(OutOfBand::Stream(StreamRecord { kind, content }));
        }
        _ => return None,
    }

    cur.at_end().then_some(record)
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Take characters while `pred` holds
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn token(&mut self) -> Option<u64> {
        let digits = self.take_while(|c| c.is_ascii_digit());
        digits.parse().ok()
    }

    fn class(&mut self) -> &'a str {
        self.take_while(|c| c != ',')
    }

    /// `(,key=value)*` until end of line
    fn results(&mut self) -> Option<Vec<(String, Value)>> {
        let mut results = Vec::new();
        while self.eat(',') {
            let key = self.key()?;
            let value = self.value()?;
            results.push((key, value));
        }
        Some(results)
    }

    /// A `key=` prefix, consumed only when present
    fn key(&mut self) -> Option<String> {
        let start = self.pos;
        let name = self.take_while(|c| !matches!(c, '=' | ',' | '{' | '}' | '[' | ']' | '"'));
        if !name.is_empty() && self.eat('=') {
            Some(name.to_string())
        } else {
            self.pos = start;
            None
        }
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            '"' => self.c_string().map(Value::Str),
            '{' => self.collection('{', '}'),
            '[' => self.collection('[', ']'),
            _ => {
                let bare = self.take_while(|c| !matches!(c, ',' | '}' | ']'));
                Some(Value::Str(bare.to_string()))
            }
        }
    }

    /// `{...}` or `[...]`; all-results contents become a tuple, anything
    /// else a list
    fn collection(&mut self, open: char, close: char) -> Option<Value> {
        if !self.eat(open) {
            return None;
        }
        if self.eat(close) {
            return Some(Value::List(Vec::new()));
        }

        let mut items: Vec<(Option<String>, Value)> = Vec::new();
        loop {
            let key = self.key();
            let value = self.value()?;
            items.push((key, value));
            if self.eat(close) {
                break;
            }
            if !self.eat(',') {
                return None;
            }
        }

        if items.iter().all(|(k, _)| k.is_some()) {
            Some(Value::Tuple(
                items
                    .into_iter()
                    .filter_map(|(k, v)| k.map(|k| (k, v)))
                    .collect(),
            ))
        } else {
            Some(Value::List(
                items
                    .into_iter()
                    .map(|(k, v)| match k {
                        Some(k) => Value::Tuple(vec![(k, v)]),
                        None => v,
                    })
                    .collect(),
            ))
        }
    }

    /// A quoted C string; escapes decode to bytes, then the bytes to UTF-8
    fn c_string(&mut self) -> Option<String> {
        if !self.eat('"') {
            return None;
        }
        let mut bytes = Vec::new();
        loop {
            match self.bump()? {
                '"' => break,
                '\\' => {
                    let c = self.bump()?;
                    match c {
                        'n' => bytes.push(b'\n'),
                        't' => bytes.push(b'\t'),
                        'r' => bytes.push(b'\r'),
                        'a' => bytes.push(0x07),
                        'b' => bytes.push(0x08),
                        'f' => bytes.push(0x0c),
                        'v' => bytes.push(0x0b),
                        'e' => bytes.push(0x1b),
                        '0'..='7' => {
                            let mut code = c as u32 - '0' as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ '0'..='7') => {
                                        code = code * 8 + (d as u32 - '0' as u32);
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            bytes.push((code & 0xff) as u8);
                        }
                        other => push_char(&mut bytes, other),
                    }
                }
                other => push_char(&mut bytes, other),
            }
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Quote an MI argument when it needs it
///
/// Arguments starting with `-` or containing anything outside
/// `[A-Za-z0-9_/.-]` are wrapped in double quotes and escaped.
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && !arg.starts_with('-')
        && arg
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));
    if plain {
        arg.to_string()
    } else {
        format!("\"{}\"", escape(arg))
    }
}

/// Escape backslashes and double quotes for use inside an MI C string
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
