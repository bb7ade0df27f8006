//! MI record and value types
//!
//! A [`Record`] is the parsed form of exactly one line of debugger output.

use serde::Serialize;

/// A value in the MI result grammar
///
/// `{}` and `[]` both become an empty [`Value::List`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a list, or the values of a tuple in order
    pub fn elements(&self) -> Vec<&Value> {
        match self {
            Value::Str(_) => Vec::new(),
            Value::List(items) => items.iter().collect(),
            Value::Tuple(pairs) => pairs.iter().map(|(_, v)| v).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Tuple(pairs) => pairs.is_empty(),
        }
    }

    /// Look up a dotted path such as `frame.line` or `stack[2].func`
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.split('.') {
            current = step(current, segment)?;
        }
        Some(current)
    }

    /// String at `path`, if present and a string
    pub fn str_at(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    let (name, indices) = split_indices(segment)?;
    let mut current = if name.is_empty() {
        value
    } else {
        match value {
            Value::Tuple(pairs) => field(pairs, name)?,
            _ => return None,
        }
    };
    for index in indices {
        current = index_into(current, index)?;
    }
    Some(current)
}

fn index_into(value: &Value, index: usize) -> Option<&Value> {
    match value {
        Value::List(items) => items.get(index),
        Value::Tuple(pairs) => pairs.get(index).map(|(_, v)| v),
        Value::Str(_) => None,
    }
}

/// Split `name[1][2]` into `("name", [1, 2])`
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let name = &segment[..open];
    let mut indices = Vec::new();
    let mut rest = &segment[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        indices.push(stripped[..close].parse().ok()?);
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return None;
    }
    Some((name, indices))
}

fn field<'a>(pairs: &'a [(String, Value)], name: &str) -> Option<&'a Value> {
    pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

/// Result class of a `^` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultClass {
    Done,
    Running,
    Error,
    Exit,
}

impl ResultClass {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            // `connected` is what gdb answers to target-select
            "done" | "connected" => Some(Self::Done),
            "running" => Some(Self::Running),
            "error" => Some(Self::Error),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResultClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Running => write!(f, "running"),
            Self::Error => write!(f, "error"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncKind {
    /// `*` records: execution state changes
    Exec,
    /// `=` records: notifications
    Notify,
    /// `+` records: progress of long operations
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AsyncRecord {
    pub kind: AsyncKind,
    pub async_class: String,
    pub output: Vec<(String, Value)>,
}

impl AsyncRecord {
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.output, path)
    }

    pub fn str_at(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Console,
    Target,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutOfBand {
    Async(AsyncRecord),
    Stream(StreamRecord),
}

/// One parsed line of MI output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Record {
    pub token: Option<u64>,
    pub result_class: Option<ResultClass>,
    pub results: Vec<(String, Value)>,
    pub out_of_band: Vec<OutOfBand>,
}

impl Record {
    /// True for prompt lines, blank lines and lines that matched nothing
    pub fn is_empty(&self) -> bool {
        self.token.is_none()
            && self.result_class.is_none()
            && self.results.is_empty()
            && self.out_of_band.is_empty()
    }

    /// Look up a path in the result section, e.g. `bkpt.number`
    pub fn result(&self, path: &str) -> Option<&Value> {
        lookup(&self.results, path)
    }

    pub fn result_str(&self, path: &str) -> Option<&str> {
        self.result(path).and_then(Value::as_str)
    }

    /// The whole result section as one tuple
    pub fn results_value(&self) -> Value {
        Value::Tuple(self.results.clone())
    }

    /// Look up a path in the first async record's output
    pub fn record(&self, path: &str) -> Option<&Value> {
        self.first_async().and_then(|r| r.get(path))
    }

    pub fn record_str(&self, path: &str) -> Option<&str> {
        self.record(path).and_then(Value::as_str)
    }

    pub fn first_async(&self) -> Option<&AsyncRecord> {
        self.out_of_band.iter().find_map(|oob| match oob {
            OutOfBand::Async(r) => Some(r),
            OutOfBand::Stream(_) => None,
        })
    }

    /// The `msg` field of an error record
    pub fn error_message(&self) -> Option<&str> {
        match self.result_class {
            Some(ResultClass::Error) => self.result_str("msg"),
            _ => None,
        }
    }

    pub fn is_class(&self, class: ResultClass) -> bool {
        self.result_class == Some(class)
    }
}

fn lookup<'a>(pairs: &'a [(String, Value)], path: &str) -> Option<&'a Value> {
    let (head, tail) = path.split_once('.').unwrap_or((path, ""));
    let (name, indices) = split_indices(head)?;
    let mut current = field(pairs, name)?;
    for index in indices {
        current = index_into(current, index)?;
    }
    current.get(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn test_value_path_lookup() {
        let value = Value::Tuple(vec![
            ("a".into(), Value::List(vec![s("x"), s("y")])),
            (
                "b".into(),
                Value::Tuple(vec![("c".into(), s("deep"))]),
            ),
        ]);
        assert_eq!(value.str_at("a[1]"), Some("y"));
        assert_eq!(value.str_at("b.c"), Some("deep"));
        assert_eq!(value.get("a[5]"), None);
        assert_eq!(value.get("missing"), None);
    }

    #[test]
    fn test_record_result_lookup() {
        let record = Record {
            token: Some(3),
            result_class: Some(ResultClass::Done),
            results: vec![(
                "bkpt".into(),
                Value::Tuple(vec![("number".into(), s("7"))]),
            )],
            out_of_band: Vec::new(),
        };
        assert_eq!(record.result_str("bkpt.number"), Some("7"));
        assert!(record.is_class(ResultClass::Done));
        assert!(record.error_message().is_none());
    }

    #[test]
    fn test_empty_record() {
        assert!(Record::default().is_empty());
    }
}
