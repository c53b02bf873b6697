//! Expression parsing.
//!
//! Precedence climbing over the binary operators, with the usual
//! arithmetic conversions and integer promotions applied while the tree
//! is built, so every node carries its final type.

use crate::common::error::{Category, CResult, WarningKind};
use crate::frontend::ast::{Node, NodeKind};
use crate::frontend::lexer::{TokenKind, TokenRef};
use crate::frontend::parser::parser::Parser;
use crate::frontend::symbol::{Builtin, SymbolKind};
use crate::frontend::types::{Base, Type, TypeRef};
use crate::backend::emit::Section;

fn binary_operator(text: &str) -> Option<(NodeKind, i32)> {
    Some(match text {
        "*" => (NodeKind::Mul, 10),
        "/" => (NodeKind::Div, 10),
        "%" => (NodeKind::Mod, 10),
        "+" => (NodeKind::Add, 9),
        "-" => (NodeKind::Sub, 9),
        "<<" => (NodeKind::Shl, 8),
        ">>" => (NodeKind::Shr, 8),
        "<" => (NodeKind::Less, 7),
        ">" => (NodeKind::Greater, 7),
        "<=" => (NodeKind::LessEqual, 7),
        ">=" => (NodeKind::GreaterEqual, 7),
        "==" => (NodeKind::Equal, 6),
        "!=" => (NodeKind::NotEqual, 6),
        "&" => (NodeKind::BitAnd, 5),
        "^" => (NodeKind::BitXor, 4),
        "|" => (NodeKind::BitOr, 3),
        "&&" => (NodeKind::LogicalAnd, 2),
        "||" => (NodeKind::LogicalOr, 1),
        _ => return None,
    })
}

fn assignment_operator(text: &str) -> Option<NodeKind> {
    Some(match text {
        "=" => NodeKind::Assign,
        "+=" => NodeKind::AddAssign,
        "-=" => NodeKind::SubAssign,
        "*=" => NodeKind::MulAssign,
        "/=" => NodeKind::DivAssign,
        "%=" => NodeKind::ModAssign,
        "&=" => NodeKind::AndAssign,
        "|=" => NodeKind::OrAssign,
        "^=" => NodeKind::XorAssign,
        "<<=" => NodeKind::ShlAssign,
        ">>=" => NodeKind::ShrAssign,
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    /// Builds a node from the current token, consuming it.
    fn op_node(&mut self, kind: NodeKind) -> CResult<Node> {
        let token = self.lexer.take()?;
        Ok(Node::new(kind, token, Type::new_base(Base::Void)))
    }

    pub(super) fn parse_expression(&mut self) -> CResult<Node> {
        let node = self.parse_assignment_expression()?;
        if !self.lexer.is(",") {
            return Ok(node);
        }

        // Comma operator: all but the last value are discarded.
        let mut sequence = Node::new(
            NodeKind::Sequence,
            self.token().clone(),
            Type::new_base(Base::Void),
        );
        let mut node = node;
        while self.lexer.accept(",")? {
            sequence.append(node.cast_base(Base::Void, None));
            node = self.parse_assignment_expression()?;
        }
        sequence.ty = node.ty.clone();
        sequence.append(node);
        Ok(sequence)
    }

    pub(super) fn parse_assignment_expression(&mut self) -> CResult<Node> {
        let left = self.parse_conditional_expression()?;

        let kind = match assignment_operator(self.token().value.as_str()) {
            Some(kind) if self.token().kind == TokenKind::Punctuation => kind,
            _ => return Ok(left),
        };
        if !left.is_location() {
            return Err(self.fatal_token(
                &left.token,
                Category::Semantic,
                "left side of assignment must be a storage location (an lvalue)",
            ));
        }

        let token = self.lexer.take()?;
        let right = self.parse_assignment_expression()?;
        let right = right.decay();

        let right = if left.ty.is_pointer() && kind != NodeKind::Assign {
            // Compound assignment to a pointer treats the value as a
            // pointer-sized integer; scaling happens during generation.
            right.cast_base(Base::UnsignedInt, None)
        } else if left.ty.is_record() {
            if !Type::compatible_unqual(&left.ty, &right.ty) {
                return Err(self.fatal_token(
                    &token,
                    Category::Semantic,
                    "cannot assign a struct/union of a different type",
                ));
            }
            right
        } else {
            right.cast(&left.ty, None)
        };

        let mut assign = Node::new(kind, token, left.ty.clone());
        assign.append(left);
        assign.append(right);
        Ok(assign)
    }

    fn parse_conditional_expression(&mut self) -> CResult<Node> {
        let condition = self.parse_binary_expression(0)?;
        if !self.lexer.is("?") {
            return Ok(condition);
        }
        let mut node = self.op_node(NodeKind::If)?;

        if self.lexer.is(":") {
            return Err(self.fatal(
                Category::Unsupported,
                "conditionals with omitted operands are not supported",
            ));
        }

        let left = self.parse_expression()?;
        self.lexer.expect(":", "expected `:` after true branch of conditional expression")?;
        let right = self.parse_conditional_expression()?;

        let (left, right) = self.conditional_branch_types(left, right)?;
        node.ty = left.ty.clone();
        node.append(condition.make_predicate());
        node.append(left);
        node.append(right);
        Ok(node)
    }

    /// Brings the two value branches of `?:` to a common type
    /// (C17 6.5.15).
    fn conditional_branch_types(&mut self, left: Node, right: Node) -> CResult<(Node, Node)> {
        let left = left.decay();
        let right = right.decay();

        if left.ty.is_indirection() || right.ty.is_indirection() {
            if Type::compatible_unqual(&left.ty, &right.ty) {
                return Ok((left, right));
            }
            let (ptr_is_left, ptr_ty, other) = if left.ty.is_indirection() {
                (true, left.ty.clone(), &right)
            } else {
                (false, right.ty.clone(), &left)
            };
            let other_is_null = other.is_null();
            let other_is_void_ptr = other
                .ty
                .pointed_to()
                .map(|t| t.is_void())
                .unwrap_or(false);
            if other_is_null || other_is_void_ptr {
                return Ok(if ptr_is_left {
                    let right = right.cast(&ptr_ty, None);
                    (left, right)
                } else {
                    let left = left.cast(&ptr_ty, None);
                    (left, right)
                });
            }
            return Err(self.fatal(
                Category::Semantic,
                "incompatible pointer types in conditional expression",
            ));
        }

        if left.ty.is_arithmetic() != right.ty.is_arithmetic() {
            return Err(self.fatal(
                Category::Semantic,
                "both or neither side of a conditional expression must be arithmetic",
            ));
        }
        if left.ty.is_arithmetic() {
            return self.usual_arithmetic_conversions(left, right);
        }

        if left.ty.is_record() || right.ty.is_record() {
            if !Type::compatible_unqual(&left.ty, &right.ty) {
                return Err(self.fatal(
                    Category::Semantic,
                    "the sides of a conditional expression cannot have different struct or union types",
                ));
            }
            return Ok((left, right));
        }

        if left.ty.is_void() && right.ty.is_void() {
            return Ok((left, right));
        }

        Err(self.fatal(
            Category::Semantic,
            "incompatible types in conditional expression",
        ))
    }

    fn parse_binary_expression(&mut self, min_precedence: i32) -> CResult<Node> {
        let mut left = self.parse_unary_expression()?;

        loop {
            let (kind, precedence) = match binary_operator(self.token().value.as_str()) {
                Some(op) if self.token().kind == TokenKind::Punctuation => op,
                _ => break,
            };
            if precedence < min_precedence {
                break;
            }
            let mut op = self.op_node(kind)?;
            let right = self.parse_binary_expression(precedence + 1)?;
            let (l, r) = self.binary_conversions(&mut op, left, right)?;
            op.append(l);
            op.append(r);
            left = op;
        }

        Ok(left)
    }

    /// Applies conversions for a binary operator and sets the result type
    /// on `op`.
    fn binary_conversions(&mut self, op: &mut Node, left: Node, right: Node) -> CResult<(Node, Node)> {
        let left = left.decay();
        let right = right.decay();
        let token = op.token.clone();

        match op.kind {
            NodeKind::Add => {
                if left.ty.is_pointer() && right.ty.is_pointer() {
                    return Err(self.fatal_token(
                        &token,
                        Category::Semantic,
                        "at most one side of an addition can be a pointer",
                    ));
                }
                if left.ty.is_pointer() || right.ty.is_pointer() {
                    let (ptr, int, ptr_first) = if left.ty.is_pointer() {
                        (left, right, true)
                    } else {
                        (right, left, false)
                    };
                    if !int.ty.is_arithmetic() {
                        return Err(self.fatal_token(
                            &token,
                            Category::Semantic,
                            "a pointer can only be added to an arithmetic type",
                        ));
                    }
                    let int = int.promote().cast_base(Base::UnsignedInt, None);
                    op.ty = ptr.ty.clone();
                    return Ok(if ptr_first { (ptr, int) } else { (int, ptr) });
                }
                self.require_arithmetic(&token, &left, &right)?;
                let (left, right) = self.usual_arithmetic_conversions(left, right)?;
                op.ty = left.ty.clone();
                Ok((left, right))
            }

            NodeKind::Sub => {
                if right.ty.is_pointer() {
                    if !left.ty.is_pointer() {
                        return Err(self.fatal_token(
                            &token,
                            Category::Semantic,
                            "cannot subtract a pointer from a non-pointer",
                        ));
                    }
                    if !Type::compatible_unqual(&left.ty, &right.ty) {
                        return Err(self.fatal_token(
                            &token,
                            Category::Semantic,
                            "cannot subtract two pointers of incompatible types",
                        ));
                    }
                    op.ty = Type::new_base(Base::SignedInt);
                    return Ok((left, right));
                }
                if left.ty.is_pointer() {
                    if !right.ty.is_arithmetic() {
                        return Err(self.fatal_token(
                            &token,
                            Category::Semantic,
                            "only an arithmetic value can be subtracted from a pointer",
                        ));
                    }
                    let right = right.promote().cast_base(Base::UnsignedInt, None);
                    op.ty = left.ty.clone();
                    return Ok((left, right));
                }
                self.require_arithmetic(&token, &left, &right)?;
                let (left, right) = self.usual_arithmetic_conversions(left, right)?;
                op.ty = left.ty.clone();
                Ok((left, right))
            }

            NodeKind::Equal
            | NodeKind::NotEqual
            | NodeKind::Less
            | NodeKind::Greater
            | NodeKind::LessEqual
            | NodeKind::GreaterEqual => {
                op.ty = Type::new_base(Base::SignedInt);
                if left.ty.is_record() || right.ty.is_record() {
                    return Err(self.fatal_token(
                        &token,
                        Category::Semantic,
                        "struct and union values cannot be compared",
                    ));
                }
                // Compatible pointer comparisons are lowered as unsigned
                // integer comparisons.
                let left = if left.ty.is_indirection() {
                    left.cast_base(Base::UnsignedInt, None)
                } else {
                    left
                };
                let right = if right.ty.is_indirection() {
                    right.cast_base(Base::UnsignedInt, None)
                } else {
                    right
                };
                self.require_arithmetic(&token, &left, &right)?;
                self.usual_arithmetic_conversions(left, right)
            }

            NodeKind::Shl | NodeKind::Shr => {
                // Shifts promote each side independently; the result has
                // the promoted type of the left operand.
                self.require_integer(&token, &left, &right)?;
                let left = left.promote();
                let right = right.promote();
                op.ty = left.ty.clone();
                Ok((left, right))
            }

            NodeKind::LogicalAnd | NodeKind::LogicalOr => {
                let left = left.make_predicate();
                let right = right.make_predicate();
                op.ty = Type::new_base(Base::Bool);
                Ok((left, right))
            }

            NodeKind::Mul | NodeKind::Div => {
                self.require_arithmetic(&token, &left, &right)?;
                let (left, right) = self.usual_arithmetic_conversions(left, right)?;
                op.ty = left.ty.clone();
                Ok((left, right))
            }

            NodeKind::Mod | NodeKind::BitAnd | NodeKind::BitOr | NodeKind::BitXor => {
                self.require_integer(&token, &left, &right)?;
                let (left, right) = self.usual_arithmetic_conversions(left, right)?;
                op.ty = left.ty.clone();
                Ok((left, right))
            }

            _ => Err(self.fatal_token(&token, Category::Internal, "not a binary operator")),
        }
    }

    fn require_arithmetic(&self, token: &TokenRef, left: &Node, right: &Node) -> CResult<()> {
        if !left.ty.is_arithmetic() {
            return Err(self.fatal_token(
                token,
                Category::Semantic,
                "left side of this operator must be an arithmetic type",
            ));
        }
        if !right.ty.is_arithmetic() {
            return Err(self.fatal_token(
                token,
                Category::Semantic,
                "right side of this operator must be an arithmetic type",
            ));
        }
        Ok(())
    }

    fn require_integer(&self, token: &TokenRef, left: &Node, right: &Node) -> CResult<()> {
        if !left.ty.is_integer() && !left.ty.is_enum() {
            return Err(self.fatal_token(
                token,
                Category::Semantic,
                "left side of this operator must be an integer",
            ));
        }
        if !right.ty.is_integer() && !right.ty.is_enum() {
            return Err(self.fatal_token(
                token,
                Category::Semantic,
                "right side of this operator must be an integer",
            ));
        }
        Ok(())
    }

    /// The usual arithmetic conversions (C17 6.3.1.8): both operands are
    /// promoted and then brought to a common type.
    pub(super) fn usual_arithmetic_conversions(
        &mut self,
        left: Node,
        right: Node,
    ) -> CResult<(Node, Node)> {
        let mut left = left.promote();
        let mut right = right.promote();

        if Type::equal(&left.ty, &right.ty) {
            return Ok((left, right));
        }

        // Floating point wins, by rank.
        for base in [Base::LongDouble, Base::Double, Base::Float] {
            if left.ty.matches_base(base) {
                right = right.cast(&left.ty.clone(), None);
                return Ok((left, right));
            }
            if right.ty.matches_base(base) {
                left = left.cast(&right.ty.clone(), None);
                return Ok((left, right));
            }
        }

        // Both integers now.
        let left_signed = left.ty.is_signed();
        let right_signed = right.ty.is_signed();
        let left_rank = left.ty.integer_rank().unwrap_or(4);
        let right_rank = right.ty.integer_rank().unwrap_or(4);

        // Same signedness: lower rank converts up.
        if left_signed == right_signed {
            return Ok(if left_rank > right_rank {
                let right = right.cast(&left.ty.clone(), None);
                (left, right)
            } else {
                let left = left.cast(&right.ty.clone(), None);
                (left, right)
            });
        }

        // The signed side converts to the unsigned side when the unsigned
        // side has equal or greater rank.
        if left_signed && left_rank <= right_rank {
            if left_rank < right_rank || left.ty.size() == right.ty.size() {
                let left = left.cast(&right.ty.clone(), None);
                return Ok((left, right));
            }
        }
        if right_signed && right_rank <= left_rank {
            if right_rank < left_rank || left.ty.size() == right.ty.size() {
                let right = right.cast(&left.ty.clone(), None);
                return Ok((left, right));
            }
        }

        // The signed side can represent everything when strictly larger.
        let left_size = left.ty.size().unwrap_or(4);
        let right_size = right.ty.size().unwrap_or(4);
        if left_signed && left_size > right_size {
            let right = right.cast(&left.ty.clone(), None);
            return Ok((left, right));
        }
        if right_signed && right_size > left_size {
            let left = left.cast(&right.ty.clone(), None);
            return Ok((left, right));
        }

        // Otherwise both convert to the unsigned counterpart of the
        // signed side's type.
        let signed_base = if left_signed { &left.ty } else { &right.ty }
            .base()
            .unwrap_or(Base::SignedInt);
        let target = Type::unsigned_of_signed(signed_base);
        let left = left.cast_base(target, None);
        let right = right.cast_base(target, None);
        Ok((left, right))
    }

    // === Unary and postfix ===

    fn parse_unary_expression(&mut self) -> CResult<Node> {
        if self.token().kind == TokenKind::Punctuation {
            let kind = match self.token().value.as_str() {
                "++" => Some(NodeKind::PreInc),
                "--" => Some(NodeKind::PreDec),
                "+" => Some(NodeKind::UnaryPlus),
                "-" => Some(NodeKind::UnaryMinus),
                "!" => Some(NodeKind::LogicalNot),
                "~" => Some(NodeKind::BitNot),
                "*" => Some(NodeKind::Dereference),
                "&" => Some(NodeKind::AddressOf),
                _ => None,
            };
            if let Some(kind) = kind {
                return self.parse_unary_operator(kind);
            }
        }

        if self.lexer.is("sizeof") {
            return self.parse_sizeof();
        }
        if self.lexer.is("_Alignof") || self.lexer.is("__alignof__") {
            return Err(self.fatal(Category::Unsupported, "_Alignof is not supported"));
        }

        self.parse_postfix_expression()
    }

    fn check_unary_operand(&self, token: &TokenRef, ty: &TypeRef) -> CResult<()> {
        if ty.is_record() {
            return Err(self.fatal_token(
                token,
                Category::Semantic,
                "cannot apply this unary operator to a struct or union value",
            ));
        }
        if ty.is_void() {
            return Err(self.fatal_token(
                token,
                Category::Semantic,
                "cannot apply this unary operator to void",
            ));
        }
        Ok(())
    }

    fn parse_unary_operator(&mut self, kind: NodeKind) -> CResult<Node> {
        let mut node = self.op_node(kind)?;
        let child = self.parse_unary_expression()?;
        let token = node.token.clone();

        match kind {
            NodeKind::PreInc | NodeKind::PreDec => {
                self.check_unary_operand(&token, &child.ty)?;
                if !child.is_location() {
                    return Err(self.fatal_token(
                        &token,
                        Category::Semantic,
                        "operand of `++`/`--` must be an lvalue",
                    ));
                }
                node.ty = child.ty.clone();
                node.append(child);
            }
            NodeKind::UnaryPlus | NodeKind::UnaryMinus => {
                self.check_unary_operand(&token, &child.ty)?;
                let child = child.decay();
                if !child.ty.is_arithmetic() {
                    return Err(self.fatal_token(
                        &token,
                        Category::Semantic,
                        "operand of unary `+`/`-` must be arithmetic",
                    ));
                }
                let child = child.promote();
                node.ty = child.ty.clone();
                node.append(child);
            }
            NodeKind::BitNot => {
                self.check_unary_operand(&token, &child.ty)?;
                let child = child.decay();
                if !child.ty.is_integer() && !child.ty.is_enum() {
                    return Err(self.fatal_token(
                        &token,
                        Category::Semantic,
                        "operand of `~` must be an integer",
                    ));
                }
                let child = child.promote();
                node.ty = child.ty.clone();
                node.append(child);
            }
            NodeKind::LogicalNot => {
                self.check_unary_operand(&token, &child.ty)?;
                node.ty = Type::new_base(Base::SignedInt);
                node.append(child.make_predicate());
            }
            NodeKind::Dereference => {
                let child = child.decay();
                let target = child.ty.pointed_to().cloned().ok_or_else(|| {
                    self.fatal_token(&token, Category::Semantic, "cannot dereference a non-pointer")
                })?;
                node.ty = target;
                node.append(child);
            }
            NodeKind::AddressOf => {
                let is_function = child.ty.is_function();
                if !is_function && !child.is_location() && child.kind != NodeKind::String {
                    return Err(self.fatal_token(
                        &token,
                        Category::Semantic,
                        "cannot take the address of this expression",
                    ));
                }
                node.ty = Type::new_pointer(child.ty.clone(), false, false, false);
                node.append(child);
            }
            _ => return Err(self.fatal_token(&token, Category::Internal, "not a unary operator")),
        }
        Ok(node)
    }

    fn parse_sizeof(&mut self) -> CResult<Node> {
        let mut node = self.op_node(NodeKind::Sizeof)?;
        let token = node.token.clone();

        let child = if self.lexer.is("(") {
            let paren = self.lexer.take()?;
            if let Some(ty) = self.try_parse_type()? {
                self.lexer.expect(")", "expected `)` after type in `sizeof(`")?;
                let mut type_node = Node::new(NodeKind::TypeName, token.clone(), ty);
                type_node.value = 0;
                type_node
            } else {
                // Not a type: an ordinary parenthesized expression. The
                // paren has already been consumed, so parse the inside and
                // let postfix operators attach afterwards.
                self.lexer.push(paren)?;
                self.parse_unary_expression()?
            }
        } else {
            // sizeof without parens binds tightly: one unary expression.
            self.parse_unary_expression()?
        };

        if child.ty.is_function() {
            return Err(self.fatal_token(
                &token,
                Category::Semantic,
                "cannot take the size of a function",
            ));
        }
        let size = if child.ty.is_void() {
            self.warnings.warn(
                WarningKind::PointerArith,
                Some(token.location()),
                "sizeof(void) is 1 as a GNU extension",
            )?;
            1
        } else {
            child.ty.size().ok_or_else(|| {
                self.fatal_token(
                    &token,
                    Category::Semantic,
                    "cannot take the size of an incomplete type",
                )
            })?
        };

        node.ty = Type::new_base(Base::UnsignedInt);
        node.value = size as i64;
        node.append(child);
        Ok(node)
    }

    fn parse_postfix_expression(&mut self) -> CResult<Node> {
        let mut node = self.parse_primary_expression()?;

        loop {
            if self.lexer.is("(") {
                node = self.parse_function_call(node)?;
                continue;
            }
            if self.lexer.is(".") {
                node = self.parse_member_access(node, NodeKind::MemberVal)?;
                continue;
            }
            if self.lexer.is("->") {
                node = self.parse_member_access(node, NodeKind::MemberPtr)?;
                continue;
            }
            if self.lexer.is("[") {
                node = self.parse_array_subscript(node)?;
                continue;
            }
            if self.lexer.is("++") {
                node = self.parse_post_incdec(node, NodeKind::PostInc)?;
                continue;
            }
            if self.lexer.is("--") {
                node = self.parse_post_incdec(node, NodeKind::PostDec)?;
                continue;
            }
            break;
        }

        Ok(node)
    }

    fn parse_post_incdec(&mut self, child: Node, kind: NodeKind) -> CResult<Node> {
        let mut node = self.op_node(kind)?;
        if !child.is_location() {
            return Err(self.fatal_token(
                &node.token,
                Category::Semantic,
                "operand of `++`/`--` must be an lvalue",
            ));
        }
        node.ty = child.ty.clone();
        node.append(child);
        Ok(node)
    }

    fn parse_function_call(&mut self, function: Node) -> CResult<Node> {
        let mut ty = function.ty.clone();
        if let Some(target) = ty.pointed_to() {
            ty = target.clone();
        }
        let sig = match ty.function() {
            Some(sig) => sig.clone(),
            None => {
                return Err(self.fatal(
                    Category::Semantic,
                    "called value is not a function or function pointer",
                ))
            }
        };

        let mut call = self.op_node(NodeKind::Call)?; // consumes `(`
        call.ty = sig.ret.clone();
        call.append(function);

        let mut arg_count = 0usize;
        if !self.lexer.accept(")")? {
            loop {
                if !sig.variadic && arg_count >= sig.params.len() {
                    return Err(self.fatal_token(
                        &call.token,
                        Category::Semantic,
                        "too many arguments in function call",
                    ));
                }

                let arg = self.parse_assignment_expression()?.decay();
                let arg = if arg_count < sig.params.len() {
                    let param_ty = &sig.params[arg_count].ty;
                    // Array parameters act as pointers.
                    let param_ty = if param_ty.is_array() {
                        let element = param_ty.pointed_to().unwrap_or_else(|| unreachable!());
                        Type::new_pointer(element.clone(), false, false, false)
                    } else {
                        param_ty.clone()
                    };
                    if param_ty.is_record() {
                        if !Type::compatible_unqual(&arg.ty, &param_ty) {
                            return Err(self.fatal_token(
                                &call.token,
                                Category::Semantic,
                                "struct/union argument has the wrong type",
                            ));
                        }
                        arg
                    } else {
                        arg.cast(&param_ty, None)
                    }
                } else {
                    // Default argument promotions for the variadic part.
                    let arg = if arg.ty.matches_base(Base::Float) {
                        arg.cast_base(Base::Double, None)
                    } else {
                        arg
                    };
                    if arg.ty.is_arithmetic() {
                        arg.promote()
                    } else {
                        arg
                    }
                };

                call.append(arg);
                arg_count += 1;

                if self.lexer.accept(")")? {
                    break;
                }
                self.lexer.expect(",", "expected `,` or `)` after function argument")?;
            }
        }

        if arg_count < sig.params.len() {
            return Err(self.fatal_token(
                &call.token,
                Category::Semantic,
                "not enough arguments in function call",
            ));
        }

        Ok(call)
    }

    fn parse_member_access(&mut self, base: Node, kind: NodeKind) -> CResult<Node> {
        let mut node = self.op_node(kind)?; // consumes `.` or `->`

        if !self.is_alphanumeric() {
            return Err(self.fatal(
                Category::Parse,
                "expected an identifier for this member access",
            ));
        }
        let member = self.lexer.take()?;

        let mut record_ty = base.ty.clone();
        if kind == NodeKind::MemberPtr {
            record_ty = base
                .ty
                .pointed_to()
                .cloned()
                .ok_or_else(|| {
                    self.fatal_token(&node.token, Category::Semantic, "cannot use `->` on a non-pointer")
                })?;
        }
        let record = record_ty.record().cloned().ok_or_else(|| {
            self.fatal_token(
                &node.token,
                Category::Semantic,
                "member access `.`/`->` requires a struct or union",
            )
        })?;
        if !record.borrow().is_defined {
            return Err(self.fatal_token(
                &node.token,
                Category::Semantic,
                "member access on a struct/union of incomplete type",
            ));
        }

        let (member_ty, offset) = record.borrow().find(&member.value).ok_or_else(|| {
            self.fatal_token(
                &member,
                Category::Semantic,
                "this struct or union has no member with this name",
            )
        })?;

        // `->` on a pointer value, `.` on a location; either way the base
        // child is evaluated by the generator.
        let base = if kind == NodeKind::MemberPtr {
            base.decay()
        } else {
            base
        };

        node.ty = member_ty;
        node.member = Some(member.value.clone());
        node.member_offset = offset;
        node.append(base);
        Ok(node)
    }

    fn parse_array_subscript(&mut self, left: Node) -> CResult<Node> {
        let mut node = self.op_node(NodeKind::ArraySubscript)?; // consumes `[`
        let right = self.parse_expression()?;
        self.lexer.expect("]", "expected `]` at the end of array subscript")?;

        // The subscript operator is symmetric: a[i] and i[a] both work.
        let (ptr, index) = if left.ty.is_indirection() {
            (left, right)
        } else if right.ty.is_indirection() {
            (right, left)
        } else {
            return Err(self.fatal_token(
                &node.token,
                Category::Semantic,
                "one side of an array subscript must be a pointer or array",
            ));
        };

        let element = ptr
            .ty
            .pointed_to()
            .cloned()
            .unwrap_or_else(|| unreachable!());
        if !element.is_complete() && !element.is_void() {
            return Err(self.fatal_token(
                &node.token,
                Category::Semantic,
                "cannot subscript a pointer to an incomplete type",
            ));
        }

        if !index.ty.is_integer() && !index.ty.is_enum() {
            return Err(self.fatal_token(
                &node.token,
                Category::Semantic,
                "an array subscript must be an integer or enum",
            ));
        }
        let ptr = ptr.decay();
        let index = index.promote().cast_base(Base::UnsignedInt, None);

        node.ty = element;
        node.append(ptr);
        node.append(index);
        Ok(node)
    }

    // === Primary expressions ===

    fn parse_primary_expression(&mut self) -> CResult<Node> {
        // An alphanumeric names a variable, function or enum constant.
        if self.is_alphanumeric() {
            let symbol = self
                .scopes
                .find_symbol(&self.value(), true)
                .filter(|s| !s.borrow().is_hidden)
                .ok_or_else(|| {
                    self.fatal(
                        Category::Semantic,
                        format!("no such variable or function: `{}`", self.value()),
                    )
                })?;

            if let SymbolKind::Builtin(builtin) = symbol.borrow().kind {
                return self.parse_builtin(builtin);
            }

            let token = self.lexer.take()?;
            let ty = symbol.borrow().ty.clone();
            let mut node = Node::new(NodeKind::Access, token, ty);
            node.symbol = Some(symbol);
            return Ok(node);
        }

        if self.lexer.is("(") {
            let paren = self.lexer.take()?;

            // A brace right after the paren is a statement expression.
            if self.lexer.is("{") {
                return self.parse_statement_expression(paren);
            }

            // A type name makes this a cast expression.
            if let Some(ty) = self.try_parse_type()? {
                self.lexer.expect(")", "expected `)` after cast type")?;
                let operand = self.parse_unary_expression()?.decay();
                let mut node = Node::new(NodeKind::Cast, paren, ty);
                node.append(operand);
                return Ok(node);
            }

            let node = self.parse_expression()?;
            self.lexer.expect(")", "expected `)` after parenthesized expression")?;
            return Ok(node);
        }

        match self.token().kind {
            TokenKind::Number => self.parse_number(),
            TokenKind::Character => self.parse_character(),
            TokenKind::String => self.parse_string(),
            _ => Err(self.fatal(
                Category::Parse,
                format!("unexpected token: `{}`", self.token().value),
            )),
        }
    }

    /// `({ ... })`: the last statement's value, or void when empty.
    fn parse_statement_expression(&mut self, paren: TokenRef) -> CResult<Node> {
        self.warnings.warn(
            WarningKind::StatementExpressions,
            Some(self.token().location()),
            "statement expressions are a GNU extension",
        )?;
        self.lexer.consume()?; // the `{`

        let mut sequence = Node::new(NodeKind::Sequence, paren, Type::new_base(Base::Void));
        self.scopes.push();
        self.parse_block_items(&mut sequence)?;
        self.scopes.pop();
        self.lexer.expect(")", "expected `)` after `}` of statement expression")?;

        sequence.ty = sequence
            .children
            .last()
            .map(|last| last.ty.clone())
            .unwrap_or_else(|| Type::new_base(Base::Void));
        Ok(sequence)
    }

    // === Literals ===

    /// Chooses a type for an integer literal, following the table in
    /// C17 6.4.4.1.5.
    fn integer_literal_type(
        &mut self,
        token: &TokenRef,
        value: u64,
        base: u32,
        suffix_unsigned: bool,
        suffix_long: bool,
        suffix_long_long: bool,
    ) -> CResult<Base> {
        if suffix_unsigned && suffix_long_long {
            return Ok(Base::UnsignedLongLong);
        }
        if value > i64::MAX as u64 {
            if base == 10 && !suffix_unsigned {
                self.warnings.warn(
                    WarningKind::ImplicitlyUnsignedLiteral,
                    Some(token.location()),
                    "this literal does not fit in `signed long long` so its type is `unsigned long long`",
                )?;
            }
            return Ok(Base::UnsignedLongLong);
        }
        if suffix_long_long {
            return Ok(Base::SignedLongLong);
        }
        if value > u32::MAX as u64 {
            return Ok(if suffix_unsigned {
                Base::UnsignedLongLong
            } else {
                Base::SignedLongLong
            });
        }
        if base == 10 && !suffix_unsigned && value > i32::MAX as u64 {
            return Ok(Base::SignedLongLong);
        }
        if suffix_unsigned && suffix_long {
            return Ok(Base::UnsignedLong);
        }
        if base != 10 && value > i32::MAX as u64 {
            return Ok(if suffix_long {
                Base::UnsignedLong
            } else {
                Base::UnsignedInt
            });
        }
        if suffix_long {
            return Ok(Base::SignedLong);
        }
        if suffix_unsigned {
            return Ok(Base::UnsignedInt);
        }
        Ok(Base::SignedInt)
    }

    fn parse_number(&mut self) -> CResult<Node> {
        debug_assert_eq!(self.token().kind, TokenKind::Number);
        let token = self.lexer.take()?;
        let text = token.value.as_str().to_string();
        let bytes = text.as_bytes();

        // Base prefix.
        let (base, digits_start) = if bytes.len() > 2 && bytes[0] == b'0' {
            match bytes[1] {
                b'x' | b'X' => (16u32, 2usize),
                b'b' | b'B' => (2, 2),
                _ => (8, 0),
            }
        } else if bytes.len() > 1 && bytes[0] == b'0' && bytes[1].is_ascii_digit() {
            (8, 0)
        } else {
            (10, 0)
        };

        // Floating literals: a dot anywhere, or an exponent in a decimal
        // literal. Hex floats are not supported.
        let has_dot = text.contains('.');
        let has_exp = base == 10 && (text.contains('e') || text.contains('E'));
        if base == 16 && (has_dot || text.contains('p') || text.contains('P')) {
            return Err(self.fatal_token(
                &token,
                Category::Unsupported,
                "hexadecimal floating literals are not supported",
            ));
        }
        if has_dot || has_exp {
            return self.parse_float_literal(token, &text);
        }

        // Accumulate digits, allowing `'` separators.
        let mut value: u64 = 0;
        let mut index = digits_start;
        let mut any_digit = false;
        let mut last_separator = false;
        while index < bytes.len() {
            let c = bytes[index];
            if c == b'\'' {
                last_separator = true;
                index += 1;
                continue;
            }
            let digit = match c {
                b'0'..=b'9' => (c - b'0') as u32,
                b'a'..=b'f' => (c - b'a' + 10) as u32,
                b'A'..=b'F' => (c - b'A' + 10) as u32,
                _ => break,
            };
            if digit >= base {
                break;
            }
            last_separator = false;
            any_digit = true;
            value = value
                .checked_mul(base as u64)
                .and_then(|v| v.checked_add(digit as u64))
                .ok_or_else(|| {
                    self.fatal_token(
                        &token,
                        Category::Semantic,
                        "number does not fit in a 64-bit integer",
                    )
                })?;
            index += 1;
        }
        if last_separator {
            return Err(self.fatal_token(
                &token,
                Category::Parse,
                "a digit separator is not allowed at the end of a number",
            ));
        }
        if !any_digit && base != 8 {
            return Err(self.fatal_token(&token, Category::Parse, "malformed number literal"));
        }

        // Suffixes.
        let mut suffix_unsigned = false;
        let mut suffix_long = false;
        let mut suffix_long_long = false;
        while index < bytes.len() {
            match bytes[index] {
                b'l' | b'L' => {
                    if suffix_long_long {
                        return Err(self.fatal_token(
                            &token,
                            Category::Parse,
                            "`long long long` integer suffix is not supported",
                        ));
                    }
                    if suffix_long {
                        suffix_long = false;
                        suffix_long_long = true;
                    } else {
                        suffix_long = true;
                    }
                    index += 1;
                }
                b'u' | b'U' => {
                    if suffix_unsigned {
                        return Err(self.fatal_token(
                            &token,
                            Category::Parse,
                            "redundant `u` suffix on integer literal",
                        ));
                    }
                    suffix_unsigned = true;
                    index += 1;
                }
                _ => {
                    return Err(self.fatal_token(&token, Category::Parse, "malformed number literal"))
                }
            }
        }

        let base_ty = self.integer_literal_type(
            &token,
            value,
            base,
            suffix_unsigned,
            suffix_long,
            suffix_long_long,
        )?;
        let mut node = Node::new(NodeKind::Number, token, Type::new_base(base_ty));
        node.value = value as i64;
        Ok(node)
    }

    fn parse_float_literal(&mut self, token: TokenRef, text: &str) -> CResult<Node> {
        let mut body = text;
        let mut base_ty = Base::Double;
        if let Some(stripped) = body.strip_suffix(['f', 'F']) {
            body = stripped;
            base_ty = Base::Float;
        } else if let Some(stripped) = body.strip_suffix(['l', 'L']) {
            body = stripped;
            base_ty = Base::LongDouble;
        }
        let value: f64 = body.parse().map_err(|_| {
            self.fatal_token(&token, Category::Parse, "malformed floating literal")
        })?;
        let mut node = Node::new(NodeKind::Number, token, Type::new_base(base_ty));
        node.value = if base_ty == Base::Float {
            (value as f32).to_bits() as i64
        } else {
            value.to_bits() as i64
        };
        Ok(node)
    }

    fn parse_character(&mut self) -> CResult<Node> {
        debug_assert_eq!(self.token().kind, TokenKind::Character);
        let token = self.lexer.take()?;
        let byte = token.value.as_str().as_bytes().first().copied().unwrap_or(0);
        let mut node = Node::new(NodeKind::Number, token, Type::new_base(Base::SignedInt));
        node.kind = NodeKind::Character;
        node.value = byte as i8 as i64;
        Ok(node)
    }

    /// Parses a string literal (plus any adjacent literals) and emits its
    /// bytes under a fresh `__S_` label: inline in the function stream, or
    /// deferred to the end of the unit at file scope.
    pub(super) fn parse_string(&mut self) -> CResult<Node> {
        debug_assert_eq!(self.token().kind, TokenKind::String);
        let label = self.emitter.alloc_string_label();
        let first = self.token().clone();

        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut length: u32 = 0;
        while self.token().kind == TokenKind::String {
            let bytes = self.token().value.as_str().as_bytes().to_vec();
            length += bytes.len() as u32;
            parts.push(bytes);
            self.lexer.consume()?;
        }
        length += 1; // terminating null

        let section = if self.current_function.is_some() {
            Section::Functions
        } else {
            Section::Deferred
        };
        let prev = self.emitter.section();
        self.emitter.set_section(section);
        self.emitter.emit_string_data(label, &parts, Some(&first));
        self.emitter.set_section(prev);

        // A string literal has type char[N]; it is not const.
        let ty = Type::new_array(Type::new_base(Base::Char), length);
        let mut node = Node::new(NodeKind::String, first, ty);
        node.string_label = Some(label);
        node.bytes = Some(parts.concat());
        Ok(node)
    }

    // === Builtins ===

    fn parse_builtin(&mut self, builtin: Builtin) -> CResult<Node> {
        let mut node = self.op_node(NodeKind::BuiltinCall)?;
        node.builtin = Some(builtin);

        match builtin {
            Builtin::VaArg => {
                self.lexer.expect("(", "expected `(` after `va_arg`")?;
                let ap = self.parse_va_list_argument()?;
                self.lexer.expect(",", "expected `,` after va_list in `va_arg`")?;
                let ty = self.try_parse_type()?.ok_or_else(|| {
                    self.fatal(Category::Parse, "expected a type after `,` in `va_arg`")
                })?;
                self.lexer.expect(")", "expected `)` after type of `va_arg`")?;
                node.ty = ty;
                node.append(ap);
            }
            Builtin::VaStart => {
                node.ty = Type::new_base(Base::Void);
                let variadic = self
                    .current_function_sig()
                    .map(|sig| sig.variadic)
                    .unwrap_or(false);
                if !variadic {
                    return Err(self.fatal_token(
                        &node.token,
                        Category::Semantic,
                        "va_start can only be used in a variadic function",
                    ));
                }
                self.lexer.expect("(", "expected `(` after `va_start`")?;
                let ap = self.parse_va_list_argument()?;
                node.append(ap);
                // Pre-C23 callers pass the last named parameter; it is
                // accepted and discarded.
                if self.lexer.accept(",")? {
                    if !self.is_alphanumeric() {
                        return Err(self.fatal(
                            Category::Parse,
                            "expected the name of the last named parameter in `va_start`",
                        ));
                    }
                    self.lexer.consume()?;
                }
                self.lexer.expect(")", "expected `)` after `va_start`")?;
            }
            Builtin::VaEnd => {
                node.ty = Type::new_base(Base::Void);
                self.lexer.expect("(", "expected `(` after `va_end`")?;
                let ap = self.parse_va_list_argument()?;
                node.append(ap);
                self.lexer.expect(")", "expected `)` after `va_end`")?;
            }
            Builtin::VaCopy => {
                node.ty = Type::new_base(Base::Void);
                self.lexer.expect("(", "expected `(` after `va_copy`")?;
                let dst = self.parse_va_list_argument()?;
                self.lexer.expect(",", "expected `,` after first argument to `va_copy`")?;
                let src = self.parse_va_list_argument()?;
                self.lexer.expect(")", "expected `)` after `va_copy`")?;
                node.append(dst);
                node.append(src);
            }
            Builtin::Func => return self.parse_builtin_func(node),
        }
        Ok(node)
    }

    fn parse_va_list_argument(&mut self) -> CResult<Node> {
        let arg = self.parse_assignment_expression()?;
        if !arg.ty.is_pointer() {
            return Err(self.fatal_token(
                &arg.token,
                Category::Semantic,
                "expected a `va_list` here",
            ));
        }
        if !arg.is_location() {
            return Err(self.fatal_token(
                &arg.token,
                Category::Semantic,
                "the `va_list` must be a modifiable lvalue",
            ));
        }
        Ok(arg)
    }

    /// `__func__`: the enclosing function's name as a string literal,
    /// emitted once per function.
    fn parse_builtin_func(&mut self, node: Node) -> CResult<Node> {
        let (name_token, name_label) = {
            let current = self.current_function.as_ref().ok_or_else(|| {
                self.fatal_token(
                    &node.token,
                    Category::Semantic,
                    "__func__ can only be used inside a function",
                )
            })?;
            (current.name.clone(), current.name_label)
        };

        let name_bytes = name_token.value.as_str().as_bytes().to_vec();
        let label = match name_label {
            Some(label) => label,
            None => {
                let label = self.emitter.alloc_string_label();
                let prev = self.emitter.section();
                self.emitter.set_section(Section::Functions);
                self.emitter
                    .emit_string_data(label, &[name_bytes.clone()], Some(&node.token));
                self.emitter.set_section(prev);
                if let Some(current) = self.current_function.as_mut() {
                    current.name_label = Some(label);
                }
                label
            }
        };

        let length = name_bytes.len() as u32 + 1;
        let ty = Type::new_array(Type::new_base(Base::Char), length);
        let mut string = Node::new(NodeKind::String, node.token, ty);
        string.string_label = Some(label);
        string.bytes = Some(name_bytes);
        Ok(string)
    }

    // === Entry points used by statements and declarations ===

    pub(super) fn parse_predicate(&mut self) -> CResult<Node> {
        Ok(self.parse_expression()?.make_predicate())
    }

    /// Case labels, enumerator values, array bounds and bit-field widths:
    /// comma and assignment are excluded, evaluation happens at parse
    /// time and rejects anything non-constant.
    pub(super) fn parse_constant_expression(&mut self) -> CResult<Node> {
        self.parse_conditional_expression()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::emit::Emitter;
    use crate::common::error::{WarningConfig, Warnings};
    use crate::common::Options;
    use crate::frontend::lexer::Lexer;

    fn parse_expr(source: &str) -> Node {
        let mut warnings = Warnings::new(WarningConfig::new());
        let mut emitter = Emitter::new(false);
        let options = Options::default();
        let lexer = Lexer::new(source.as_bytes().to_vec(), "test.i").unwrap();
        let mut parser = Parser::new(lexer, &mut warnings, &mut emitter, &options).unwrap();
        parser.parse_expression().unwrap()
    }

    #[test]
    fn matching_types_need_no_conversion() {
        // Usual arithmetic conversions on already-matching types are a
        // no-op: neither operand gains a cast.
        let node = parse_expr("1 + 2");
        assert_eq!(node.kind, NodeKind::Add);
        assert_eq!(node.children[0].kind, NodeKind::Number);
        assert_eq!(node.children[1].kind, NodeKind::Number);
        assert!(node.ty.matches_base(Base::SignedInt));
    }

    #[test]
    fn signed_converts_to_unsigned_at_equal_rank() {
        let node = parse_expr("1 + 2u");
        assert_eq!(node.children[0].kind, NodeKind::Cast);
        assert!(node.children[0].ty.matches_base(Base::UnsignedInt));
        assert!(node.ty.matches_base(Base::UnsignedInt));
    }

    #[test]
    fn long_long_wins_over_int() {
        let node = parse_expr("1ll + 2");
        assert!(node.ty.matches_base(Base::SignedLongLong));
        assert_eq!(node.children[1].kind, NodeKind::Cast);
    }

    #[test]
    fn double_wins_over_integers() {
        let node = parse_expr("1 + 2.0");
        assert!(node.ty.matches_base(Base::Double));
        assert_eq!(node.children[0].kind, NodeKind::Cast);
    }

    #[test]
    fn literal_types_follow_the_c17_table() {
        assert!(parse_expr("42").ty.matches_base(Base::SignedInt));
        assert!(parse_expr("100u").ty.matches_base(Base::UnsignedInt));
        assert!(parse_expr("100l").ty.matches_base(Base::SignedLong));
        assert!(parse_expr("100ull").ty.matches_base(Base::UnsignedLongLong));
        // A decimal literal past INT32_MAX widens to long long.
        assert!(parse_expr("5000000000").ty.matches_base(Base::SignedLongLong));
        // A hex literal past INT32_MAX stays unsigned int.
        assert!(parse_expr("0xFFFFFFFF").ty.matches_base(Base::UnsignedInt));
        assert!(parse_expr("1.5").ty.matches_base(Base::Double));
        assert!(parse_expr("1.5f").ty.matches_base(Base::Float));
    }

    #[test]
    fn shift_keeps_the_left_type() {
        let node = parse_expr("1u << 3");
        assert!(node.ty.matches_base(Base::UnsignedInt));
    }

    #[test]
    fn character_literal_is_int() {
        let node = parse_expr("'A'");
        assert_eq!(node.value, 65);
        assert!(node.ty.matches_base(Base::SignedInt));
    }

    #[test]
    fn comparison_yields_int() {
        let node = parse_expr("1 < 2");
        assert_eq!(node.kind, NodeKind::Less);
        assert!(node.ty.matches_base(Base::SignedInt));
    }
}
