//! The minimal AST this pass operates over.
//!
//! A real compiler hands this pass its own tree type (see `host::CompilerHost`
//! for everything we instead consume through an interface). Since this crate
//! has no such host to import a type from, it defines the node-kind subset
//! this pass touches: literals, identifiers, assignments, calls, `if`,
//! `case`, `while`, `block`, `break`, `return`, `try`/`except`/`finally`,
//! `yield`, `raise`, a var section, statement lists — plus the two
//! introduced kinds, `State` and `GotoState`.
//!
//! Every node kind that can be synthesized carries a [`CodeRange`] so source
//! locations propagate onto generated code exactly like user code.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// A line/column pair. 0-indexed, matching the convention used for diagnostics
/// elsewhere in this family of crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub col: u32,
}

/// A source span. Synthesized nodes copy the span of the construct they
/// replace so diagnostics and (eventually) debug info stay accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CodeRange {
    pub start: CodeLoc,
    pub end: CodeLoc,
}

impl CodeRange {
    pub const fn synthetic() -> Self {
        Self {
            start: CodeLoc { line: 0, col: 0 },
            end: CodeLoc { line: 0, col: 0 },
        }
    }
}

/// The name of a variable, hidden state slot, or synthesized temporary.
///
/// This pass never resolves names to namespace slots itself (that is a
/// lambda-lifting/prepare-phase concern); it only ever needs a name to read
/// or write through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Symbol(pub String);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An identifier reference with its source location.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Ident {
    pub name: Symbol,
    pub pos: CodeRange,
}

impl Ident {
    pub fn new(name: impl Into<Symbol>, pos: CodeRange) -> Self {
        Self { name: name.into(), pos }
    }
}

/// A literal type name. The full type system is out of scope for this
/// pass; we carry just enough to name a temporary's type when
/// synthesizing `newTempVar(T)` / the `tmpResult: R` slot.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TypeRef(pub String);

impl TypeRef {
    pub fn unit() -> Self {
        Self("()".to_owned())
    }

    pub fn is_unit(&self) -> bool {
        self.0 == "()"
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Binary operators, including the short-circuiting logical ones.
///
/// Open question recorded in DESIGN.md: the original design detects `and`/
/// `or` as calls to host-provided magic primitives (`getSysMagic`). Since
/// this crate has no symbol-magic table to consult, short-circuit operators
/// are instead dedicated `BinOp` variants the expression lowering pass
/// recognizes directly. Behavior (explicit `if` preserving short-circuit
/// semantics) is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_short_circuit(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// An expression, tagged with its source location.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExprLoc {
    pub pos: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(pos: CodeRange, expr: Expr) -> Self {
        Self { pos, expr }
    }

    pub fn contains_yield(&self) -> bool {
        expr_contains_yield(&self.expr)
    }
}

fn expr_contains_yield(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) | Expr::Name(_) => false,
        Expr::Yield(_) => true,
        Expr::Paren(e) | Expr::Deref(e) => e.contains_yield(),
        Expr::Tuple(items) | Expr::ArrayLit(items) => items.iter().any(ExprLoc::contains_yield),
        Expr::ObjectLit(fields) => fields.iter().any(|(_, v)| v.contains_yield()),
        Expr::Call { callee, args } => callee.contains_yield() || args.iter().any(ExprLoc::contains_yield),
        Expr::AttrAccess { object, .. } => object.contains_yield(),
        Expr::Index { object, index } => object.contains_yield() || index.contains_yield(),
        Expr::Cast { value, .. } => value.contains_yield(),
        Expr::CheckedRange { lo, hi } => lo.contains_yield() || hi.contains_yield(),
        Expr::BinOp { lhs, rhs, .. } => lhs.contains_yield() || rhs.contains_yield(),
        Expr::Block(stmts) => stmts.iter().any(stmt_contains_yield),
        Expr::StateRef(_) => false,
    }
}

pub(crate) fn stmt_contains_yield(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::ExprStmt(e) => e.contains_yield(),
        Stmt::Assign { value, .. } => value.contains_yield(),
        Stmt::VarSection(bindings) => bindings.iter().any(|b| b.init.as_ref().is_some_and(ExprLoc::contains_yield)),
        Stmt::If { test, body, or_else } => test.contains_yield() || body.iter().any(stmt_contains_yield) || or_else.iter().any(stmt_contains_yield),
        Stmt::Case { subject, arms, or_else } => {
            subject.contains_yield()
                || arms.iter().any(|a| a.test.contains_yield() || a.body.iter().any(stmt_contains_yield))
                || or_else.iter().any(stmt_contains_yield)
        }
        Stmt::While { test, body } => test.contains_yield() || body.iter().any(stmt_contains_yield),
        Stmt::Block { body, .. } => body.iter().any(stmt_contains_yield),
        Stmt::Break { .. } => false,
        Stmt::Return(e) => e.as_ref().is_some_and(ExprLoc::contains_yield),
        Stmt::Raise(e) => e.as_ref().is_some_and(ExprLoc::contains_yield),
        Stmt::Yield(_) => true,
        Stmt::Try(t) => {
            t.body.iter().any(stmt_contains_yield)
                || t.handlers.iter().any(|h| h.body.iter().any(stmt_contains_yield))
                || t.or_else.iter().any(stmt_contains_yield)
                || t.finally.iter().any(stmt_contains_yield)
        }
        Stmt::StmtList(stmts) => stmts.iter().any(stmt_contains_yield),
        Stmt::State(s) => s.body.iter().any(stmt_contains_yield),
        Stmt::GotoState(_) | Stmt::GotoStateDynamic(_) => false,
        Stmt::DispatchState => false,
    }
}

/// Whether `stmt` transitively contains a `break` (to any label). Combined
/// with [`stmt_contains_yield`] this is the `hasControlFlow`
/// predicate: the state-splitter only ever needs to open up a statement list
/// at a child that contains one of the two, since those are the only
/// constructs that can require a state boundary.
pub(crate) fn stmt_contains_break(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::ExprStmt(_) | Stmt::Assign { .. } | Stmt::VarSection(_) => false,
        Stmt::If { body, or_else, .. } => body.iter().any(stmt_contains_break) || or_else.iter().any(stmt_contains_break),
        Stmt::Case { arms, or_else, .. } => {
            arms.iter().any(|a| a.body.iter().any(stmt_contains_break)) || or_else.iter().any(stmt_contains_break)
        }
        Stmt::While { body, .. } => body.iter().any(stmt_contains_break),
        Stmt::Block { body, .. } => body.iter().any(stmt_contains_break),
        Stmt::Break { .. } => true,
        Stmt::Return(_) | Stmt::Raise(_) | Stmt::Yield(_) => false,
        Stmt::Try(t) => {
            t.body.iter().any(stmt_contains_break)
                || t.handlers.iter().any(|h| h.body.iter().any(stmt_contains_break))
                || t.or_else.iter().any(stmt_contains_break)
                || t.finally.iter().any(stmt_contains_break)
        }
        Stmt::StmtList(stmts) => stmts.iter().any(stmt_contains_break),
        Stmt::State(s) => s.body.iter().any(stmt_contains_break),
        Stmt::GotoState(_) | Stmt::GotoStateDynamic(_) | Stmt::DispatchState => false,
    }
}

/// Whether `stmt` transitively contains a `return`. Not part of the
/// `hasControlFlow` (which only names `yield`/`break`), but the
/// state-splitter needs it too: a `return` lexically inside a `try` that has
/// a pending `finally` must go through the unroll protocol
/// wherever it sits, even when the particular branch holding it contains no
/// `yield` of its own — only the `try` as a whole needs to contain one for
/// the finally to exist as a state at all. See `DESIGN.md` for why this
/// widens the literal predicate.
pub(crate) fn stmt_contains_return(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::ExprStmt(_) | Stmt::Assign { .. } | Stmt::VarSection(_) => false,
        Stmt::If { body, or_else, .. } => body.iter().any(stmt_contains_return) || or_else.iter().any(stmt_contains_return),
        Stmt::Case { arms, or_else, .. } => {
            arms.iter().any(|a| a.body.iter().any(stmt_contains_return)) || or_else.iter().any(stmt_contains_return)
        }
        Stmt::While { body, .. } => body.iter().any(stmt_contains_return),
        Stmt::Block { body, .. } => body.iter().any(stmt_contains_return),
        Stmt::Break { .. } | Stmt::Raise(_) | Stmt::Yield(_) => false,
        Stmt::Return(_) => true,
        Stmt::Try(t) => {
            t.body.iter().any(stmt_contains_return)
                || t.handlers.iter().any(|h| h.body.iter().any(stmt_contains_return))
                || t.or_else.iter().any(stmt_contains_return)
                || t.finally.iter().any(stmt_contains_return)
        }
        Stmt::StmtList(stmts) => stmts.iter().any(stmt_contains_return),
        Stmt::State(s) => s.body.iter().any(stmt_contains_return),
        Stmt::GotoState(_) | Stmt::GotoStateDynamic(_) | Stmt::DispatchState => false,
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expr {
    Literal(Literal),
    Name(Ident),
    Paren(Box<ExprLoc>),
    Tuple(Vec<ExprLoc>),
    ArrayLit(Vec<ExprLoc>),
    ObjectLit(Vec<(Symbol, ExprLoc)>),
    Call { callee: Box<ExprLoc>, args: Vec<ExprLoc> },
    AttrAccess { object: Box<ExprLoc>, attr: Symbol },
    Index { object: Box<ExprLoc>, index: Box<ExprLoc> },
    Cast { value: Box<ExprLoc>, ty: TypeRef },
    Deref(Box<ExprLoc>),
    CheckedRange { lo: Box<ExprLoc>, hi: Box<ExprLoc> },
    BinOp { op: BinOp, lhs: Box<ExprLoc>, rhs: Box<ExprLoc> },
    /// `yield` used in expression position (its value is whatever the caller
    /// sends back in on resume). Statement-position `yield` is [`Stmt::Yield`].
    Yield(Option<Box<ExprLoc>>),
    /// A statement list used in expression position (`if`/`case`/`try`/
    /// `while`-as-expression, or an explicit `{ ... }` block). Its value is
    /// the trailing [`Stmt::ExprStmt`], if any. Component B's job is to
    /// eliminate every occurrence of this variant that contains a yield.
    Block(Vec<Stmt>),
    /// Reads a state's final integer id. Introduced by the state-splitter
    /// for `unrollUntil`/`afterUnroll` assignments that must name a state
    /// before the folding pass has renumbered it; resolved to a plain `Literal::Int` by
    /// the state-assignment lowering pass once every id is final.
    StateRef(StateId),
}

/// A single binding in a `var`/`let` section.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VarBinding {
    pub name: Ident,
    pub ty: TypeRef,
    pub init: Option<ExprLoc>,
}

/// One `case`/`match` arm. Pattern matching has already been lowered to a
/// boolean `test` plus binding assignments by the time this pass sees it
/// (mirrors how richer pattern syntax is lowered to plain control flow and
/// assignments ahead of this stage in other members of this crate family).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CaseArm {
    pub test: ExprLoc,
    pub bindings: Vec<Stmt>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExceptHandler {
    /// `None` = bare `except:` (catches everything).
    pub exc_type: Option<ExprLoc>,
    pub bound_name: Option<Ident>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
    pub or_else: Vec<Stmt>,
    pub finally: Vec<Stmt>,
}

/// Identity of a `block` label, used to resolve `break`. Identity, not name:
/// two differently-scoped blocks may share a surface name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BlockLabel(pub u32);

/// The label of the synthetic `block stateLoop: ...` that the loop-wrapping
/// scaffold wraps every concatenated state body in. Reserved rather than
/// allocated through [`host::CompilerHost::fresh_id`] (crate::host) so that
/// component F can refer to it without threading an id through the whole
/// pipeline; every real label allocated via `fresh_id` starts at 1.
pub const STATE_LOOP_LABEL: BlockLabel = BlockLabel(0);

/// A provisional or resolved state id, shared by reference.
///
/// During construction a [`StateRecord`] is assigned a sentinel id; every
/// [`Stmt::GotoState`] that targets it clones this handle rather than
/// capturing an integer. The folding pass mutates the cell in place when it
/// assigns final contiguous indices, which silently redirects every existing
/// jump without having to walk the tree again.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct StateId(Rc<Cell<i64>>);

impl StateId {
    pub fn provisional(sentinel: i64) -> Self {
        Self(Rc::new(Cell::new(sentinel)))
    }

    pub fn exit() -> Self {
        Self(Rc::new(Cell::new(-1)))
    }

    pub fn get(&self) -> i64 {
        self.0.get()
    }

    pub fn set(&self, id: i64) {
        self.0.set(id);
    }

    pub fn is_exit(&self) -> bool {
        self.get() == -1
    }

    /// A stable identity for this handle's underlying cell, independent of
    /// its current value. Used by [`crate::fold`] to look a forwarding
    /// target back up by the index it was allocated at, before any ids are
    /// final.
    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateId({})", self.get())
    }
}

impl PartialEq for StateId {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.get() == other.get()
    }
}

/// A `GotoState` target: either the exit state or a (possibly still
/// provisional) state reference.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum GotoTarget {
    State(StateId),
}

impl GotoTarget {
    pub fn id(&self) -> i64 {
        match self {
            Self::State(s) => s.get(),
        }
    }
}

/// `excHandler`: empty, or a reference to a `finally`/`except` state,
/// encoded with the sign convention (`+k` ⇒ finally,
/// `−k` ⇒ except).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ExcHandler {
    None,
    Finally(StateId),
    Except(StateId),
}

impl ExcHandler {
    /// Resolves to the signed table entry, once every
    /// target id is final.
    pub fn table_entry(&self) -> i16 {
        match self {
            Self::None => 0,
            Self::Finally(s) => i16::try_from(s.get()).expect("state id exceeds exception table width"),
            Self::Except(s) => -i16::try_from(s.get()).expect("state id exceeds exception table width"),
        }
    }
}

/// One basic block of the synthesized state machine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StateRecord {
    pub id: StateId,
    pub body: Vec<Stmt>,
    pub exc_handler: ExcHandler,
}

/// The left-hand side of an [`Stmt::Assign`]: either a bare local/field name
/// already resolved to a symbol, or an attribute on some object expression
/// (used when a hidden variable lives on a lambda-lifted environment
/// record).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AssignTarget {
    Name(Ident),
    Attr { object: Box<ExprLoc>, attr: Symbol },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Stmt {
    ExprStmt(ExprLoc),
    VarSection(Vec<VarBinding>),
    Assign { target: AssignTarget, value: ExprLoc },
    If { test: ExprLoc, body: Vec<Stmt>, or_else: Vec<Stmt> },
    Case { subject: ExprLoc, arms: Vec<CaseArm>, or_else: Vec<Stmt> },
    While { test: ExprLoc, body: Vec<Stmt> },
    Block { label: Option<BlockLabel>, body: Vec<Stmt> },
    Break { label: Option<BlockLabel> },
    Return(Option<ExprLoc>),
    Raise(Option<ExprLoc>),
    Yield(Option<ExprLoc>),
    Try(TryStmt),
    /// A nested statement sequence. Lowering passes use this to splice
    /// generated statements in without having to re-flatten their caller's
    /// `Vec<Stmt>` in place.
    StmtList(Vec<Stmt>),
    /// Introduced kind: a labeled basic block, see [`StateRecord`].
    State(StateRecord),
    /// Introduced kind: an unresolved jump, see [`GotoTarget`].
    GotoState(GotoTarget),
    /// Introduced kind: a jump to whatever state id a hidden variable
    /// currently holds at runtime (used for `afterUnroll`, which names a
    /// state chosen dynamically by an earlier partial `break` unroll rather
    /// than a static target). Component F lowers this identically to
    /// [`Stmt::GotoState`]'s non-exit case, just reading an expression
    /// instead of a literal.
    GotoStateDynamic(ExprLoc),
    /// Introduced kind: the computed dispatch on the current value of the
    /// hidden `state` variable that opens the `stateLoop` block (the loop's
    /// scaffold). Left unresolved by this pass — a later pass may collapse
    /// it into labels/computed goto or a `case` over `state`.
    DispatchState,
}

impl Stmt {
    pub fn list(pos: CodeRange, stmts: Vec<Stmt>) -> ExprLoc {
        ExprLoc::new(pos, Expr::Block(stmts))
    }
}

/// Flattens `StmtList` wrappers one level at a time, the way the empty-state
/// detector does when deciding whether a state's body is "just" a goto.
pub fn skip_stmt_list_wrappers(stmts: &[Stmt]) -> &[Stmt] {
    let mut cur = stmts;
    while let [Stmt::StmtList(inner)] = cur {
        cur = inner;
    }
    cur
}
