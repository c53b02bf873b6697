//! Statement parsing.

use crate::common::error::{Category, CResult};
use crate::frontend::ast::{Node, NodeKind};
use crate::frontend::parser::parser::Parser;
use crate::frontend::parser::const_eval;
use crate::frontend::types::{Base, Type};

impl<'a> Parser<'a> {
    /// Parses block items up to and including the closing `}`. The
    /// opening brace has already been consumed.
    pub(super) fn parse_block_items(&mut self, parent: &mut Node) -> CResult<()> {
        while !self.lexer.accept("}")? {
            if self.lexer.token().is_end() {
                return Err(self.fatal(Category::Parse, "unexpected end of input inside a block"));
            }
            self.parse_declaration_or_statement(parent)?;
        }
        Ok(())
    }

    pub(super) fn parse_declaration_or_statement(&mut self, parent: &mut Node) -> CResult<()> {
        if self.try_parse_declaration(Some(parent))? {
            return Ok(());
        }
        self.parse_statement(parent)
    }

    /// Parses one statement into its own node (used for the branches of
    /// if/while/for, which need exactly one child).
    fn parse_statement_node(&mut self) -> CResult<Node> {
        let mut wrapper = Node::new(
            NodeKind::Sequence,
            self.token().clone(),
            Type::new_base(Base::Void),
        );
        self.parse_declaration_or_statement(&mut wrapper)?;
        // Unwrap the common single-statement case.
        if wrapper.children.len() == 1 && wrapper.children[0].kind != NodeKind::Variable {
            return Ok(wrapper.children.pop().unwrap_or_else(|| unreachable!()));
        }
        Ok(wrapper)
    }

    fn parse_statement(&mut self, parent: &mut Node) -> CResult<()> {
        // Empty statement.
        if self.lexer.accept(";")? {
            return Ok(());
        }

        // Compound statement.
        if self.lexer.is("{") {
            let token = self.lexer.take()?;
            let mut block = Node::new(NodeKind::Sequence, token, Type::new_base(Base::Void));
            self.scopes.push();
            self.parse_block_items(&mut block)?;
            self.scopes.pop();
            parent.append(block);
            return Ok(());
        }

        if self.is_alphanumeric() {
            match self.token().value.as_str() {
                "if" => return self.parse_if(parent),
                "while" => return self.parse_while(parent),
                "do" => return self.parse_do_while(parent),
                "for" => return self.parse_for(parent),
                "switch" => return self.parse_switch(parent),
                "case" => return self.parse_case(parent),
                "default" => return self.parse_default(parent),
                "break" => {
                    let token = self.lexer.take()?;
                    self.lexer.expect(";", "expected `;` after `break`")?;
                    parent.append(Node::new(NodeKind::Break, token, Type::new_base(Base::Void)));
                    return Ok(());
                }
                "continue" => {
                    let token = self.lexer.take()?;
                    self.lexer.expect(";", "expected `;` after `continue`")?;
                    parent.append(Node::new(
                        NodeKind::Continue,
                        token,
                        Type::new_base(Base::Void),
                    ));
                    return Ok(());
                }
                "goto" => return self.parse_goto(parent),
                "return" => return self.parse_return(parent),
                _ => {
                    // A label is an identifier directly followed by `:`.
                    if !self.at_declaration_start() {
                        let name = self.lexer.take()?;
                        if self.lexer.accept(":")? {
                            let mut label =
                                Node::new(NodeKind::Label, name.clone(), Type::new_base(Base::Void));
                            label.label = Some(name.value.clone());
                            label.append(self.parse_statement_node()?);
                            parent.append(label);
                            return Ok(());
                        }
                        self.lexer.push(name)?;
                    }
                }
            }
        }

        // Expression statement.
        let expr = self.parse_expression()?;
        self.lexer.expect(";", "expected `;` after expression")?;
        parent.append(expr);
        Ok(())
    }

    fn parse_if(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        self.lexer.expect("(", "expected `(` after `if`")?;
        let condition = self.parse_predicate()?;
        self.lexer.expect(")", "expected `)` after `if` condition")?;

        let mut node = Node::new(NodeKind::If, token, Type::new_base(Base::Void));
        node.append(condition);
        node.append(self.parse_statement_node()?);
        if self.lexer.accept("else")? {
            node.append(self.parse_statement_node()?);
        }
        parent.append(node);
        Ok(())
    }

    fn parse_while(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        self.lexer.expect("(", "expected `(` after `while`")?;
        let condition = self.parse_predicate()?;
        self.lexer.expect(")", "expected `)` after `while` condition")?;

        let mut node = Node::new(NodeKind::While, token, Type::new_base(Base::Void));
        node.append(condition);
        node.append(self.parse_statement_node()?);
        parent.append(node);
        Ok(())
    }

    fn parse_do_while(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        let mut node = Node::new(NodeKind::DoWhile, token, Type::new_base(Base::Void));
        node.append(self.parse_statement_node()?);
        self.lexer.expect("while", "expected `while` after body of `do`")?;
        self.lexer.expect("(", "expected `(` after `while`")?;
        let condition = self.parse_predicate()?;
        self.lexer.expect(")", "expected `)` after `do`/`while` condition")?;
        self.lexer.expect(";", "expected `;` after `do`/`while`")?;
        node.append(condition);
        parent.append(node);
        Ok(())
    }

    fn parse_for(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        self.lexer.expect("(", "expected `(` after `for`")?;
        self.scopes.push();

        let mut node = Node::new(NodeKind::For, token.clone(), Type::new_base(Base::Void));

        // Initializer: a declaration, an expression, or nothing.
        let mut init = Node::new(NodeKind::Sequence, token.clone(), Type::new_base(Base::Void));
        if !self.lexer.accept(";")? {
            if !self.try_parse_declaration(Some(&mut init))? {
                init.append(self.parse_expression()?);
                self.lexer.expect(";", "expected `;` after `for` initializer")?;
            }
        }
        node.append(init);

        // Condition: empty means forever.
        let condition = if self.lexer.is(";") {
            Node::new(NodeKind::Sequence, token.clone(), Type::new_base(Base::Void))
        } else {
            self.parse_predicate()?
        };
        self.lexer.expect(";", "expected `;` after `for` condition")?;
        node.append(condition);

        // Increment.
        let mut increment =
            Node::new(NodeKind::Sequence, token.clone(), Type::new_base(Base::Void));
        if !self.lexer.is(")") {
            increment.append(self.parse_expression()?);
        }
        self.lexer.expect(")", "expected `)` after `for` clauses")?;
        node.append(increment);

        node.append(self.parse_statement_node()?);
        self.scopes.pop();
        parent.append(node);
        Ok(())
    }

    fn parse_switch(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        self.lexer.expect("(", "expected `(` after `switch`")?;
        let condition = self.parse_expression()?;
        if !condition.ty.is_integer() && !condition.ty.is_enum() {
            return Err(self.fatal_token(
                &token,
                Category::Semantic,
                "the controlling expression of `switch` must be an integer",
            ));
        }
        let condition = condition.promote();
        self.lexer.expect(")", "expected `)` after `switch` expression")?;

        let mut node = Node::new(NodeKind::Switch, token, Type::new_base(Base::Void));
        node.append(condition);
        node.append(self.parse_statement_node()?);
        parent.append(node);
        Ok(())
    }

    fn parse_case(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        let value_node = self.parse_constant_expression()?;
        let value = const_eval::eval_int(&value_node)?;
        self.lexer.expect(":", "expected `:` after `case` value")?;

        let mut node = Node::new(NodeKind::Case, token, Type::new_base(Base::Void));
        node.value = value;
        node.append(self.parse_statement_node()?);
        parent.append(node);
        Ok(())
    }

    fn parse_default(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        self.lexer.expect(":", "expected `:` after `default`")?;
        let mut node = Node::new(NodeKind::Default, token, Type::new_base(Base::Void));
        node.append(self.parse_statement_node()?);
        parent.append(node);
        Ok(())
    }

    fn parse_goto(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        if !self.is_alphanumeric() {
            return Err(self.fatal(Category::Parse, "expected a label name after `goto`"));
        }
        let target = self.lexer.take()?;
        self.lexer.expect(";", "expected `;` after `goto`")?;
        let mut node = Node::new(NodeKind::Goto, token, Type::new_base(Base::Void));
        node.label = Some(target.value.clone());
        parent.append(node);
        Ok(())
    }

    fn parse_return(&mut self, parent: &mut Node) -> CResult<()> {
        let token = self.lexer.take()?;
        let return_ty = self
            .current_function_sig()
            .map(|sig| sig.ret.clone())
            .unwrap_or_else(|| Type::new_base(Base::Void));

        let mut node = Node::new(NodeKind::Return, token.clone(), Type::new_base(Base::Void));
        if !self.lexer.accept(";")? {
            if return_ty.is_void() {
                return Err(self.fatal_token(
                    &token,
                    Category::Semantic,
                    "`return` with a value in a function returning void",
                ));
            }
            let value = self.parse_expression()?.decay();
            let value = if return_ty.is_record() {
                if !Type::compatible_unqual(&value.ty, &return_ty) {
                    return Err(self.fatal_token(
                        &token,
                        Category::Semantic,
                        "returned struct/union has the wrong type",
                    ));
                }
                value
            } else {
                value.cast(&return_ty, None)
            };
            node.append(value);
            self.lexer.expect(";", "expected `;` after `return` value")?;
        }
        parent.append(node);
        Ok(())
    }
}
