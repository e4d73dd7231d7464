// Tree shape produced by the reader (src/reader.rs) and consumed by the
// lowerer (src/lower): the parser hands the lowerer a tree of these five
// node kinds, nothing more.

use std::rc::Rc;

pub type Node<T> = Rc<T>;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Byte(u8),
    String(Rc<str>),
    Identifier(Rc<str>),
    List(Vec<Node<Value>>),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(items.into_iter().map(Rc::new).collect())
    }

    pub fn ident(name: &str) -> Value {
        Value::Identifier(Rc::from(name))
    }

    pub fn as_list(&self) -> Option<&[Node<Value>]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Value::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Byte(b) => Some(*b as i64),
            _ => None,
        }
    }

    // A short, human-readable description of this node's shape, used in
    // error messages: the offending form's shape must be identifiable,
    // with no structured error code attached.
    pub fn shape(&self) -> String {
        match self {
            Value::Int(n) => format!("{}", n),
            Value::Byte(b) => format!("{}u8", b),
            Value::String(s) => format!("{:?}", s),
            Value::Identifier(name) => name.to_string(),
            Value::List(items) => {
                let head = items
                    .first()
                    .and_then(|v| v.as_identifier())
                    .unwrap_or("?");
                format!("({} ...{} args)", head, items.len().saturating_sub(1))
            }
        }
    }
}
