// Type validator.
//
// Grammar: `type := "void" | "int" | "byte" | "ptr" type`.
// `ptr void` is rejected; trailing identifiers after a scalar are rejected.
// `TypeDef` equality is structural, and a stable `key` string (used for
// function-name mangling) is derived from the scalar and pointer_level.

use crate::ast::Value;
use crate::error::CompileError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    Void,
    Int,
    Byte,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeDef {
    pub scalar: Scalar,
    pub pointer_level: usize,
}

impl TypeDef {
    pub const VOID: TypeDef = TypeDef {
        scalar: Scalar::Void,
        pointer_level: 0,
    };
    pub const INT: TypeDef = TypeDef {
        scalar: Scalar::Int,
        pointer_level: 0,
    };
    pub const BYTE: TypeDef = TypeDef {
        scalar: Scalar::Byte,
        pointer_level: 0,
    };

    pub fn is_void(&self) -> bool {
        self.scalar == Scalar::Void && self.pointer_level == 0
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_level > 0
    }

    pub fn pointee(&self) -> TypeDef {
        debug_assert!(self.is_pointer());
        TypeDef {
            scalar: self.scalar,
            pointer_level: self.pointer_level - 1,
        }
    }

    pub fn add_pointer(&self) -> TypeDef {
        TypeDef {
            scalar: self.scalar,
            pointer_level: self.pointer_level + 1,
        }
    }

    // Stable string used both for diagnostics and for mangling function
    // names in the overloading key ("name concatenated with
    // the key of each argument type in declaration order").
    pub fn key(&self) -> String {
        let base = match self.scalar {
            Scalar::Void => "void",
            Scalar::Int => "int",
            Scalar::Byte => "byte",
        };
        format!("{}{}", "p".repeat(self.pointer_level), base)
    }

    // The pointer-arithmetic scale: `ptr byte` scales by 1, every other
    // pointee scales by 8 (one slot), matching the `lea` scale rule.
    pub fn pointer_scale(&self) -> i64 {
        debug_assert!(self.is_pointer());
        if self.pointee() == TypeDef::BYTE {
            1
        } else {
            8
        }
    }

    // The cast compatibility table.
    //
    // Returns `Some(true)` if the cast is allowed and reinterprets the bit
    // pattern as-is; `Some(false)` if the cast is allowed but narrowing
    // (currently only int -> byte, which must emit `cast8`); `None` if the
    // cast is rejected outright.
    pub fn can_cast_to(&self, dst: &TypeDef) -> Option<bool> {
        if self.is_pointer() {
            if dst.is_pointer() || *dst == TypeDef::INT {
                return Some(true);
            }
            return None;
        }
        match self.scalar {
            Scalar::Int => {
                if dst.is_pointer() || *dst == TypeDef::INT {
                    Some(true)
                } else if *dst == TypeDef::BYTE {
                    Some(false)
                } else {
                    None
                }
            }
            Scalar::Byte => {
                if *dst == TypeDef::INT || *dst == TypeDef::BYTE {
                    Some(true)
                } else {
                    None
                }
            }
            Scalar::Void => None,
        }
    }

    pub fn describe(&self) -> String {
        self.key()
    }
}

impl std::fmt::Display for TypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

// Parses a type sub-tree: either a bare identifier ("void"/"int"/"byte")
// or a `(ptr T)`-shaped list node. The reader hands us identifiers for
// unparenthesized type atoms and lists for `ptr` chains written as
// S-expressions (e.g. `(ptr (ptr int))`); both spellings are accepted so
// that a type position reads naturally either as `int` or as a pointer
// chain built with `ptr`.
pub fn parse_type(node: &Value) -> Result<TypeDef, CompileError> {
    match node {
        Value::Identifier(name) => scalar_from_name(name),
        Value::List(items) => {
            if items.len() != 2 {
                return Err(CompileError::InvalidType(node.shape()));
            }
            let head = items[0]
                .as_identifier()
                .ok_or_else(|| CompileError::InvalidType(node.shape()))?;
            if head != "ptr" {
                return Err(CompileError::InvalidType(node.shape()));
            }
            let inner = parse_type(&items[1])?;
            if inner.is_void() {
                return Err(CompileError::InvalidType("ptr void".to_string()));
            }
            Ok(inner.add_pointer())
        }
        _ => Err(CompileError::InvalidType(node.shape())),
    }
}

fn scalar_from_name(name: &str) -> Result<TypeDef, CompileError> {
    match name {
        "void" => Ok(TypeDef::VOID),
        "int" => Ok(TypeDef::INT),
        "byte" => Ok(TypeDef::BYTE),
        other => Err(CompileError::InvalidType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Value;

    #[test]
    fn scalars_parse() {
        assert_eq!(parse_type(&Value::ident("int")).unwrap(), TypeDef::INT);
        assert_eq!(parse_type(&Value::ident("byte")).unwrap(), TypeDef::BYTE);
        assert_eq!(parse_type(&Value::ident("void")).unwrap(), TypeDef::VOID);
    }

    #[test]
    fn ptr_void_rejected() {
        let t = Value::list(vec![Value::ident("ptr"), Value::ident("void")]);
        assert!(parse_type(&t).is_err());
    }

    #[test]
    fn nested_ptr() {
        let t = Value::list(vec![
            Value::ident("ptr"),
            Value::list(vec![Value::ident("ptr"), Value::ident("byte")]),
        ]);
        let parsed = parse_type(&t).unwrap();
        assert_eq!(parsed.pointer_level, 2);
        assert_eq!(parsed.scalar, Scalar::Byte);
        assert_eq!(parsed.key(), "ppbyte");
    }

    #[test]
    fn cast_table() {
        assert_eq!(TypeDef::INT.can_cast_to(&TypeDef::BYTE), Some(false));
        assert_eq!(TypeDef::BYTE.can_cast_to(&TypeDef::INT), Some(true));
        assert_eq!(TypeDef::VOID.can_cast_to(&TypeDef::INT), None);
        let p = TypeDef::INT.add_pointer();
        assert_eq!(p.can_cast_to(&TypeDef::INT), Some(true));
        assert_eq!(p.can_cast_to(&p), Some(true));
    }
}
