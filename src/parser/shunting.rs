//! Tree construction: an extended shunting-yard over the token stream.
//!
//! Beyond classic operator precedence this pass tracks, per open frame,
//! whether an operand has been seen (disambiguating unary minus from
//! binary minus and indexing from array literals), counts call and
//! literal arguments, converts an index frame into a slice when a bare
//! `:` appears inside it, and builds ternary and comprehension frames.

use phf::phf_map;

use crate::error::{Error, ParseResult, Span};
use crate::expr::{BinaryOp, Expr, ExprNode, NodeId, UnaryOp};
use crate::name::Name;
use crate::value::Value;

use super::token::{SpannedToken, Token};

/// Binding strength and associativity of a binary operator.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub prec: u8,
    pub right_assoc: bool,
}

/// The full binary operator table.
pub static BINARY_OPS: phf::Map<&'static str, OpInfo> = phf_map! {
    "**" => OpInfo { prec: 14, right_assoc: true },
    "*" => OpInfo { prec: 12, right_assoc: false },
    "/" => OpInfo { prec: 12, right_assoc: false },
    "%" => OpInfo { prec: 12, right_assoc: false },
    "+" => OpInfo { prec: 11, right_assoc: false },
    "-" => OpInfo { prec: 11, right_assoc: false },
    "<" => OpInfo { prec: 10, right_assoc: false },
    ">" => OpInfo { prec: 10, right_assoc: false },
    "<=" => OpInfo { prec: 10, right_assoc: false },
    ">=" => OpInfo { prec: 10, right_assoc: false },
    "==" => OpInfo { prec: 9, right_assoc: false },
    "!=" => OpInfo { prec: 9, right_assoc: false },
    "&" => OpInfo { prec: 8, right_assoc: false },
    "^" => OpInfo { prec: 7, right_assoc: false },
    "|" => OpInfo { prec: 6, right_assoc: false },
    "&&" => OpInfo { prec: 5, right_assoc: false },
    "and" => OpInfo { prec: 5, right_assoc: false },
    "||" => OpInfo { prec: 4, right_assoc: false },
    "or" => OpInfo { prec: 4, right_assoc: false },
    "??" => OpInfo { prec: 3, right_assoc: false },
};

fn binary_from(sym: &str) -> Option<BinaryOp> {
    Some(match sym {
        "**" => BinaryOp::Pow,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "<" => BinaryOp::Lt,
        ">" => BinaryOp::Gt,
        "<=" => BinaryOp::Le,
        ">=" => BinaryOp::Ge,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "&" => BinaryOp::EagerAnd,
        "^" => BinaryOp::Xor,
        "|" => BinaryOp::EagerOr,
        "&&" | "and" => BinaryOp::And,
        "||" | "or" => BinaryOp::Or,
        "??" => BinaryOp::Coalesce,
        _ => return None,
    })
}

// =====================================================================
// Machine state
// =====================================================================

/// An open bracketing construct on the operator stack.
#[derive(Debug)]
enum Frame {
    Paren,
    Call { name: Name, args: usize },
    /// `target[...`; flips to a slice when a bare `:` shows up inside.
    Index { slice: bool },
    ArrayLit { items: usize },
    TupleLit { items: usize },
}

#[derive(Debug)]
enum StackOp {
    Bin(BinaryOp),
    Un(UnaryOp),
    /// `?` waiting for its `:`.
    TernaryOpen,
    /// `:` seen; pops as a three-operand build.
    TernaryClose,
    For { var: Name, filtered: bool },
    Open(Frame),
}

/// Reverse-polish output items.
#[derive(Debug)]
enum OutItem {
    Leaf(ExprNode),
    Un(UnaryOp),
    Bin(BinaryOp),
    Ternary,
    Field(Name),
    Index,
    Slice,
    Call { name: Name, args: usize },
    ArrayLit { items: usize },
    TupleLit { items: usize },
    ForEach { var: Name, filtered: bool },
}

struct Shunter {
    out: Vec<OutItem>,
    ops: Vec<StackOp>,
    /// One slot per open frame plus the base slot: has the current
    /// operand position been filled?
    have: Vec<bool>,
}

impl Shunter {
    fn new() -> Shunter {
        Shunter {
            out: Vec::new(),
            ops: Vec::new(),
            have: vec![false],
        }
    }

    fn have(&self) -> bool {
        self.have.last().copied().unwrap_or(false)
    }

    fn set_have(&mut self, v: bool) {
        if let Some(slot) = self.have.last_mut() {
            *slot = v;
        }
    }

    fn push_frame(&mut self, frame: Frame) {
        self.ops.push(StackOp::Open(frame));
        self.have.push(false);
    }

    /// Close the innermost frame's operand slot and mark the outer one
    /// as filled.
    fn pop_have(&mut self) {
        self.have.pop();
        self.set_have(true);
    }

    fn leaf(&mut self, node: ExprNode) -> ParseResult<()> {
        if self.have() {
            return Err(Error::syntax("expected an operator"));
        }
        self.out.push(OutItem::Leaf(node));
        self.set_have(true);
        Ok(())
    }

    fn emit(&mut self, op: StackOp) {
        match op {
            StackOp::Bin(b) => self.out.push(OutItem::Bin(b)),
            StackOp::Un(u) => self.out.push(OutItem::Un(u)),
            StackOp::TernaryClose => self.out.push(OutItem::Ternary),
            StackOp::For { var, filtered } => self.out.push(OutItem::ForEach { var, filtered }),
            StackOp::TernaryOpen | StackOp::Open(_) => {}
        }
    }

    /// Pop operators that bind at least as tightly as an incoming
    /// operator of the given precedence.
    fn pop_ops(&mut self, prec: u8, right: bool) {
        loop {
            let top_prec = match self.ops.last() {
                Some(StackOp::Bin(op)) => op.precedence(),
                Some(StackOp::Un(_)) => 13,
                Some(StackOp::TernaryClose) => 2,
                Some(StackOp::For { .. }) => 1,
                _ => break,
            };
            if top_prec > prec || (top_prec == prec && !right) {
                if let Some(op) = self.ops.pop() {
                    self.emit(op);
                }
            } else {
                break;
            }
        }
    }

    /// Flush every pending operator of the current frame.
    fn flush_to_frame(&mut self) -> ParseResult<()> {
        let mut popped = false;
        while matches!(
            self.ops.last(),
            Some(StackOp::Bin(_) | StackOp::Un(_) | StackOp::TernaryClose | StackOp::For { .. })
        ) {
            popped = true;
            if let Some(op) = self.ops.pop() {
                self.emit(op);
            }
        }
        if popped && !self.have() {
            return Err(Error::syntax("missing operand after operator"));
        }
        Ok(())
    }

    fn operator(&mut self, sym: &'static str) -> ParseResult<()> {
        if !self.have() {
            let op = match sym {
                "-" => UnaryOp::Neg,
                "+" => UnaryOp::Pos,
                "!" => UnaryOp::Not,
                _ => return Err(Error::syntax(format!("expected a value before `{}`", sym))),
            };
            self.ops.push(StackOp::Un(op));
            return Ok(());
        }
        let info = BINARY_OPS
            .get(sym)
            .ok_or_else(|| Error::syntax(format!("`{}` is not a binary operator", sym)))?;
        let op = binary_from(sym)
            .ok_or_else(|| Error::syntax(format!("`{}` is not a binary operator", sym)))?;
        self.pop_ops(info.prec, info.right_assoc);
        self.ops.push(StackOp::Bin(op));
        self.set_have(false);
        Ok(())
    }

    fn comma(&mut self) -> ParseResult<()> {
        if !self.have() {
            return Err(Error::syntax("empty element before `,`"));
        }
        self.flush_to_frame()?;
        match self.ops.last_mut() {
            Some(StackOp::Open(Frame::Call { args, .. })) => *args += 1,
            Some(StackOp::Open(Frame::ArrayLit { items }))
            | Some(StackOp::Open(Frame::TupleLit { items })) => *items += 1,
            Some(StackOp::Open(Frame::Index { .. })) => {
                return Err(Error::syntax("`,` is not allowed inside an index"))
            }
            Some(StackOp::TernaryOpen) => return Err(Error::syntax("`?` is missing its `:`")),
            _ => return Err(Error::syntax("`,` outside a call or literal")),
        }
        self.set_have(false);
        Ok(())
    }

    fn close_paren(&mut self) -> ParseResult<()> {
        self.flush_to_frame()?;
        match self.ops.pop() {
            Some(StackOp::Open(Frame::Paren)) => {
                if !self.have() {
                    return Err(Error::syntax("empty parentheses"));
                }
                self.pop_have();
                Ok(())
            }
            Some(StackOp::Open(Frame::Call { name, args })) => {
                let n = args + usize::from(self.have());
                self.pop_have();
                self.out.push(OutItem::Call { name, args: n });
                Ok(())
            }
            Some(StackOp::TernaryOpen) => Err(Error::syntax("`?` is missing its `:`")),
            _ => Err(Error::syntax("unmatched `)`")),
        }
    }

    fn close_bracket(&mut self) -> ParseResult<()> {
        self.flush_to_frame()?;
        match self.ops.pop() {
            Some(StackOp::Open(Frame::Index { slice })) => {
                if slice {
                    if !self.have() {
                        self.out.push(OutItem::Leaf(ExprNode::Const(Value::Empty)));
                    }
                    self.pop_have();
                    self.out.push(OutItem::Slice);
                } else {
                    if !self.have() {
                        return Err(Error::syntax("missing index expression"));
                    }
                    self.pop_have();
                    self.out.push(OutItem::Index);
                }
                Ok(())
            }
            Some(StackOp::Open(Frame::ArrayLit { items })) => {
                let n = items + usize::from(self.have());
                self.pop_have();
                self.out.push(OutItem::ArrayLit { items: n });
                Ok(())
            }
            Some(StackOp::TernaryOpen) => Err(Error::syntax("`?` is missing its `:`")),
            _ => Err(Error::syntax("unmatched `]`")),
        }
    }

    fn close_brace(&mut self) -> ParseResult<()> {
        self.flush_to_frame()?;
        match self.ops.pop() {
            Some(StackOp::Open(Frame::TupleLit { items })) => {
                let n = items + usize::from(self.have());
                self.pop_have();
                self.out.push(OutItem::TupleLit { items: n });
                Ok(())
            }
            Some(StackOp::TernaryOpen) => Err(Error::syntax("`?` is missing its `:`")),
            _ => Err(Error::syntax("unmatched `}`")),
        }
    }

    /// A `:` is a slice separator when the innermost open frame is an
    /// index bracket and no `?` intervenes; otherwise it closes a `?`.
    fn colon(&mut self) -> ParseResult<()> {
        enum ColonKind {
            Ternary,
            Slice,
        }
        let mut kind = None;
        for op in self.ops.iter().rev() {
            match op {
                StackOp::Bin(_)
                | StackOp::Un(_)
                | StackOp::TernaryClose
                | StackOp::For { .. } => continue,
                StackOp::TernaryOpen => {
                    kind = Some(ColonKind::Ternary);
                    break;
                }
                StackOp::Open(Frame::Index { slice: false }) => {
                    kind = Some(ColonKind::Slice);
                    break;
                }
                StackOp::Open(Frame::Index { slice: true }) => {
                    return Err(Error::syntax("a slice takes a single `:`"));
                }
                StackOp::Open(_) => break,
            }
        }
        match kind {
            Some(ColonKind::Ternary) => {
                if !self.have() {
                    return Err(Error::syntax("`:` needs a value to its left"));
                }
                while !matches!(self.ops.last(), Some(StackOp::TernaryOpen)) {
                    match self.ops.pop() {
                        Some(
                            op @ (StackOp::Bin(_)
                            | StackOp::Un(_)
                            | StackOp::TernaryClose
                            | StackOp::For { .. }),
                        ) => self.emit(op),
                        _ => return Err(Error::syntax("`:` without a matching `?`")),
                    }
                }
                self.ops.pop();
                self.ops.push(StackOp::TernaryClose);
                self.set_have(false);
                Ok(())
            }
            Some(ColonKind::Slice) => {
                self.flush_to_frame()?;
                if !self.have() {
                    self.out.push(OutItem::Leaf(ExprNode::Const(Value::Empty)));
                }
                if let Some(StackOp::Open(Frame::Index { slice })) = self.ops.last_mut() {
                    *slice = true;
                }
                self.set_have(false);
                Ok(())
            }
            None => Err(Error::syntax("`:` outside a slice or conditional")),
        }
    }

    fn comprehension_filter(&mut self) -> ParseResult<()> {
        if !self.have() {
            return Err(Error::syntax("`if` needs a source to its left"));
        }
        loop {
            match self.ops.last() {
                Some(StackOp::Bin(_) | StackOp::Un(_) | StackOp::TernaryClose) => {
                    if let Some(op) = self.ops.pop() {
                        self.emit(op);
                    }
                }
                Some(StackOp::For { filtered: false, .. }) => break,
                Some(StackOp::For { filtered: true, .. }) => {
                    return Err(Error::syntax("a comprehension takes a single `if`"));
                }
                Some(StackOp::TernaryOpen) => {
                    return Err(Error::syntax("`?` is missing its `:`"))
                }
                _ => return Err(Error::syntax("`if` outside a comprehension")),
            }
        }
        if let Some(StackOp::For { filtered, .. }) = self.ops.last_mut() {
            *filtered = true;
        }
        self.set_have(false);
        Ok(())
    }

    fn step(&mut self, token: &Token) -> ParseResult<()> {
        match token {
            Token::Int(v) => self.leaf(ExprNode::Const(Value::UInt(*v))),
            Token::Float(v) => self.leaf(ExprNode::Const(Value::Float(*v))),
            Token::Bool(b) => self.leaf(ExprNode::Const(Value::Bool(*b))),
            Token::Str(s) => self.leaf(ExprNode::Const(Value::Str(s.clone()))),
            Token::Ref(name) => self.leaf(ExprNode::NameRef(name.clone())),
            Token::FuncOpen(name) => {
                if self.have() {
                    return Err(Error::syntax("expected an operator before a call"));
                }
                self.push_frame(Frame::Call {
                    name: name.clone(),
                    args: 0,
                });
                Ok(())
            }
            Token::OpenParen => {
                if self.have() {
                    return Err(Error::syntax("expected an operator before `(`"));
                }
                self.push_frame(Frame::Paren);
                Ok(())
            }
            Token::OpenBracket => {
                if self.have() {
                    self.push_frame(Frame::Index { slice: false });
                } else {
                    self.push_frame(Frame::ArrayLit { items: 0 });
                }
                Ok(())
            }
            Token::OpenBrace => {
                if self.have() {
                    return Err(Error::syntax("expected an operator before `{`"));
                }
                self.push_frame(Frame::TupleLit { items: 0 });
                Ok(())
            }
            Token::Comma => self.comma(),
            Token::CloseParen => self.close_paren(),
            Token::CloseBracket => self.close_bracket(),
            Token::CloseBrace => self.close_brace(),
            Token::Question => {
                if !self.have() {
                    return Err(Error::syntax("`?` needs a condition"));
                }
                self.pop_ops(2, true);
                self.ops.push(StackOp::TernaryOpen);
                self.set_have(false);
                Ok(())
            }
            Token::Colon => self.colon(),
            Token::For(var) => {
                if !self.have() {
                    return Err(Error::syntax("`for` needs a body expression"));
                }
                self.pop_ops(1, false);
                self.ops.push(StackOp::For {
                    var: var.clone(),
                    filtered: false,
                });
                self.set_have(false);
                Ok(())
            }
            Token::If => self.comprehension_filter(),
            Token::Field(name) => {
                if !self.have() {
                    return Err(Error::syntax("`.` needs a value to its left"));
                }
                self.out.push(OutItem::Field(name.clone()));
                Ok(())
            }
            Token::Op(sym) => self.operator(sym),
        }
    }

    fn finish(mut self) -> ParseResult<Vec<OutItem>> {
        while let Some(op) = self.ops.pop() {
            match op {
                StackOp::TernaryOpen => return Err(Error::syntax("`?` is missing its `:`")),
                StackOp::Open(Frame::Paren) => return Err(Error::syntax("unclosed `(`")),
                StackOp::Open(Frame::Call { name, .. }) => {
                    return Err(Error::syntax(format!("unclosed call to `{}`", name)))
                }
                StackOp::Open(Frame::Index { .. })
                | StackOp::Open(Frame::ArrayLit { .. }) => {
                    return Err(Error::syntax("unclosed `[`"))
                }
                StackOp::Open(Frame::TupleLit { .. }) => {
                    return Err(Error::syntax("unclosed `{`"))
                }
                other => self.emit(other),
            }
        }
        if !self.have() {
            if self.out.is_empty() {
                return Err(Error::syntax("empty expression"));
            }
            return Err(Error::syntax("expression ends with a dangling operator"));
        }
        Ok(self.out)
    }
}

// =====================================================================
// Entry point
// =====================================================================

/// Build a placeholder tree (references still unresolved) from tokens.
pub fn build_tree(tokens: &[SpannedToken]) -> ParseResult<Expr> {
    let mut shunter = Shunter::new();
    for tok in tokens {
        shunter
            .step(&tok.token)
            .map_err(|e| e.with_span(Span::at_offset(tok.offset, tok.length)))?;
    }
    let end = tokens
        .last()
        .map(|t| t.offset + t.length)
        .unwrap_or(0);
    let items = shunter
        .finish()
        .map_err(|e| e.with_span(Span::at_offset(end, 0)))?;
    build(items).map_err(|e| e.with_span(Span::at_offset(end, 0)))
}

fn build(items: Vec<OutItem>) -> ParseResult<Expr> {
    fn pop(stack: &mut Vec<NodeId>) -> ParseResult<NodeId> {
        stack.pop().ok_or_else(|| Error::syntax("malformed expression"))
    }
    let mut expr = Expr::empty();
    let mut stack: Vec<NodeId> = Vec::new();
    for item in items {
        let id = match item {
            OutItem::Leaf(node) => expr.push(node),
            OutItem::Un(op) => {
                let operand = pop(&mut stack)?;
                expr.push(ExprNode::Unary { op, operand })
            }
            OutItem::Bin(op) => {
                let rhs = pop(&mut stack)?;
                let lhs = pop(&mut stack)?;
                expr.push(ExprNode::Binary { op, lhs, rhs })
            }
            OutItem::Ternary => {
                let else_branch = pop(&mut stack)?;
                let then_branch = pop(&mut stack)?;
                let cond = pop(&mut stack)?;
                expr.push(ExprNode::Ternary {
                    cond,
                    then_branch,
                    else_branch,
                })
            }
            OutItem::Field(field) => {
                let target = pop(&mut stack)?;
                expr.push(ExprNode::Field { target, field })
            }
            OutItem::Index => {
                let index = pop(&mut stack)?;
                let target = pop(&mut stack)?;
                expr.push(ExprNode::Index { target, index })
            }
            OutItem::Slice => {
                let hi = pop(&mut stack)?;
                let lo = pop(&mut stack)?;
                let target = pop(&mut stack)?;
                expr.push(ExprNode::Slice { target, lo, hi })
            }
            OutItem::Call { name, args } => {
                let mut ids = Vec::with_capacity(args);
                for _ in 0..args {
                    ids.push(pop(&mut stack)?);
                }
                ids.reverse();
                expr.push(ExprNode::Call {
                    name,
                    args: ids,
                    sig: None,
                })
            }
            OutItem::ArrayLit { items: n } => {
                let mut ids = Vec::with_capacity(n);
                for _ in 0..n {
                    ids.push(pop(&mut stack)?);
                }
                ids.reverse();
                expr.push(ExprNode::Array(ids))
            }
            OutItem::TupleLit { items: n } => {
                let mut ids = Vec::with_capacity(n);
                for _ in 0..n {
                    ids.push(pop(&mut stack)?);
                }
                ids.reverse();
                expr.push(ExprNode::Tuple(ids))
            }
            OutItem::ForEach { var, filtered } => {
                let filter = if filtered {
                    Some(pop(&mut stack)?)
                } else {
                    None
                };
                let source = pop(&mut stack)?;
                let body = pop(&mut stack)?;
                expr.push(ExprNode::ForEach {
                    var,
                    body,
                    source,
                    filter,
                })
            }
        };
        stack.push(id);
    }
    if stack.len() != 1 {
        return Err(Error::syntax("malformed expression"));
    }
    expr.set_root(stack[0]);
    Ok(expr)
}
