//! Parse-time evaluation of constant expressions.
//!
//! Used for case labels, enumerator values, array bounds, bit-field
//! widths, and global initializers. Arithmetic wraps to the width and
//! signedness of each node's type, matching what the generated code
//! would compute.

use crate::common::error::{Category, CResult, Diagnostic};
use crate::frontend::ast::{Node, NodeKind};
use crate::frontend::symbol::SymbolKind;
use crate::frontend::types::{Base, TypeRef};

/// A constant scalar: integer or floating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
}

fn not_constant(node: &Node) -> Box<Diagnostic> {
    Box::new(
        Diagnostic::new(Category::Semantic, "expected a constant expression")
            .with_location(node.token.location()),
    )
}

/// Wraps a value to the width and signedness of `ty`.
fn wrap(value: i64, ty: &TypeRef) -> i64 {
    if ty.matches_base(Base::Bool) {
        return (value != 0) as i64;
    }
    let size = ty.size().unwrap_or(4);
    let signed = ty.is_signed();
    match (size, signed) {
        (1, true) => value as i8 as i64,
        (1, false) => value as u8 as i64,
        (2, true) => value as i16 as i64,
        (2, false) => value as u16 as i64,
        (4, true) => value as i32 as i64,
        (4, false) => value as u32 as i64,
        _ => value,
    }
}

/// Evaluates an integer constant expression.
pub fn eval_int(node: &Node) -> CResult<i64> {
    eval(node)
}

fn eval(node: &Node) -> CResult<i64> {
    match node.kind {
        NodeKind::Number => {
            if node.ty.is_floating() {
                return Err(not_constant(node));
            }
            Ok(node.value)
        }
        NodeKind::Character => Ok(node.value),

        NodeKind::Access => {
            let symbol = node.symbol.as_ref().ok_or_else(|| not_constant(node))?;
            let symbol = symbol.borrow();
            if symbol.kind == SymbolKind::Constant {
                Ok(symbol.enum_value as i64)
            } else {
                Err(not_constant(node))
            }
        }

        NodeKind::Cast => {
            if !node.ty.is_integer() && !node.ty.is_enum() && !node.ty.is_pointer() {
                return Err(not_constant(node));
            }
            let value = eval(node.first())?;
            Ok(wrap(value, &node.ty))
        }

        NodeKind::Sizeof => Ok(node.value),

        NodeKind::UnaryPlus => eval(node.first()),
        NodeKind::UnaryMinus => Ok(wrap(eval(node.first())?.wrapping_neg(), &node.ty)),
        NodeKind::BitNot => Ok(wrap(!eval(node.first())?, &node.ty)),
        NodeKind::LogicalNot => Ok((eval(node.first())? == 0) as i64),

        NodeKind::Add
        | NodeKind::Sub
        | NodeKind::Mul
        | NodeKind::Div
        | NodeKind::Mod
        | NodeKind::Shl
        | NodeKind::Shr
        | NodeKind::BitAnd
        | NodeKind::BitOr
        | NodeKind::BitXor => eval_binary(node),

        NodeKind::Equal
        | NodeKind::NotEqual
        | NodeKind::Less
        | NodeKind::Greater
        | NodeKind::LessEqual
        | NodeKind::GreaterEqual => eval_comparison(node),

        NodeKind::LogicalAnd => {
            let left = eval(node.first())?;
            if left == 0 {
                return Ok(0);
            }
            Ok((eval(node.last())? != 0) as i64)
        }
        NodeKind::LogicalOr => {
            let left = eval(node.first())?;
            if left != 0 {
                return Ok(1);
            }
            Ok((eval(node.last())? != 0) as i64)
        }

        NodeKind::If if node.children.len() == 3 => {
            let condition = eval(&node.children[0])?;
            if condition != 0 {
                eval(&node.children[1])
            } else {
                eval(&node.children[2])
            }
        }

        _ => Err(not_constant(node)),
    }
}

fn eval_binary(node: &Node) -> CResult<i64> {
    let left = eval(node.first())?;
    let right = eval(node.last())?;
    let signed = node.ty.is_signed();

    let value = match node.kind {
        NodeKind::Add => left.wrapping_add(right),
        NodeKind::Sub => left.wrapping_sub(right),
        NodeKind::Mul => left.wrapping_mul(right),
        NodeKind::Div => {
            if right == 0 {
                return Err(Box::new(
                    Diagnostic::new(Category::Semantic, "division by zero in constant expression")
                        .with_location(node.token.location()),
                ));
            }
            if signed {
                left.wrapping_div(right)
            } else {
                ((left as u64).wrapping_div(right as u64)) as i64
            }
        }
        NodeKind::Mod => {
            if right == 0 {
                return Err(Box::new(
                    Diagnostic::new(Category::Semantic, "division by zero in constant expression")
                        .with_location(node.token.location()),
                ));
            }
            if signed {
                left.wrapping_rem(right)
            } else {
                ((left as u64).wrapping_rem(right as u64)) as i64
            }
        }
        NodeKind::Shl => left.wrapping_shl(right as u32 & 63),
        NodeKind::Shr => {
            let width_mask = if node.ty.size() == Some(8) { 63 } else { 31 };
            let shift = right as u32 & width_mask;
            if signed {
                left >> shift
            } else {
                ((left as u64) >> shift) as i64
            }
        }
        NodeKind::BitAnd => left & right,
        NodeKind::BitOr => left | right,
        NodeKind::BitXor => left ^ right,
        _ => unreachable!(),
    };
    Ok(wrap(value, &node.ty))
}

fn eval_comparison(node: &Node) -> CResult<i64> {
    let left_node = node.first();
    let right_node = node.last();
    let left = eval(left_node)?;
    let right = eval(right_node)?;
    // Operands were already brought to a common type by the parser.
    let signed = left_node.ty.is_signed();

    let result = if signed {
        match node.kind {
            NodeKind::Equal => left == right,
            NodeKind::NotEqual => left != right,
            NodeKind::Less => left < right,
            NodeKind::Greater => left > right,
            NodeKind::LessEqual => left <= right,
            NodeKind::GreaterEqual => left >= right,
            _ => unreachable!(),
        }
    } else {
        let (l, r) = (left as u64, right as u64);
        match node.kind {
            NodeKind::Equal => l == r,
            NodeKind::NotEqual => l != r,
            NodeKind::Less => l < r,
            NodeKind::Greater => l > r,
            NodeKind::LessEqual => l <= r,
            NodeKind::GreaterEqual => l >= r,
            _ => unreachable!(),
        }
    };
    Ok(result as i64)
}

/// Evaluates a constant scalar that may be floating point, for global
/// initializers.
pub fn eval_scalar(node: &Node) -> CResult<Value> {
    match node.kind {
        NodeKind::Number if node.ty.is_floating() => {
            let value = if node.ty.matches_base(Base::Float) {
                f32::from_bits(node.value as u32) as f64
            } else {
                f64::from_bits(node.value as u64)
            };
            Ok(Value::Float(value))
        }
        NodeKind::UnaryMinus if node.ty.is_floating() => {
            match eval_scalar(node.first())? {
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Int(i) => Ok(Value::Float(-(i as f64))),
            }
        }
        NodeKind::Cast if node.ty.is_floating() => match eval_scalar(node.first())? {
            Value::Float(f) => Ok(Value::Float(f)),
            Value::Int(i) => {
                if node.first().ty.is_signed() {
                    Ok(Value::Float(i as f64))
                } else {
                    Ok(Value::Float(i as u64 as f64))
                }
            }
        },
        _ => Ok(Value::Int(eval(node)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::Node;
    use crate::frontend::lexer::{Token, TokenKind};
    use crate::frontend::types::Type;
    use crate::common::intern::StringPool;

    fn int_node(pool: &mut StringPool, value: i64) -> Node {
        let tok = Token::new(
            TokenKind::Number,
            pool.intern(&value.to_string()),
            pool.intern("t.i"),
            1,
        );
        let mut node = Node::new(NodeKind::Number, tok, Type::new_base(Base::SignedInt));
        node.value = value;
        node
    }

    fn binary(pool: &mut StringPool, kind: NodeKind, a: i64, b: i64) -> Node {
        let tok = Token::new(TokenKind::Punctuation, pool.intern("+"), pool.intern("t.i"), 1);
        let mut node = Node::new(kind, tok, Type::new_base(Base::SignedInt));
        node.append(int_node(pool, a));
        node.append(int_node(pool, b));
        node
    }

    #[test]
    fn arithmetic_folds() {
        let mut pool = StringPool::new();
        assert_eq!(eval(&binary(&mut pool, NodeKind::Add, 2, 3)).unwrap(), 5);
        assert_eq!(eval(&binary(&mut pool, NodeKind::Mul, -4, 8)).unwrap(), -32);
        assert_eq!(eval(&binary(&mut pool, NodeKind::Shl, 1, 10)).unwrap(), 1024);
        assert_eq!(eval(&binary(&mut pool, NodeKind::Shr, -8, 2)).unwrap(), -2);
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let mut pool = StringPool::new();
        assert!(eval(&binary(&mut pool, NodeKind::Div, 1, 0)).is_err());
        assert!(eval(&binary(&mut pool, NodeKind::Mod, 1, 0)).is_err());
    }

    #[test]
    fn int_arithmetic_wraps_to_32_bits() {
        let mut pool = StringPool::new();
        let result = eval(&binary(&mut pool, NodeKind::Add, i32::MAX as i64, 1)).unwrap();
        assert_eq!(result, i32::MIN as i64);
    }
}
