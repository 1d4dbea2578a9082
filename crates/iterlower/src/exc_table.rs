//! Component E — exception table construction.
//!
//! Once every state has its final id (after [`crate::fold`]), the
//! per-state `excHandler` becomes one row of a flat `Vec<i16>` indexed by
//! state id, using the sign convention [`crate::ast::ExcHandler::table_entry`]
//! already encodes (`+k` finally, `-k` except, `0` none). The runtime
//! consults this table whenever a `yield`-driving call raises: find the
//! current state's row, jump to its handler (stashing the exception first via
//! `closureIterSetupExc`).
//!
//! This module also builds the outer `try`/`except` wrapper around the whole
//! generated loop body — the piece of
//! scaffolding that actually reads this table at runtime, expressed directly
//! as AST rather than left to a lower layer, since nothing downstream of this
//! pass understands `yield`-driven control flow well enough to synthesize it
//! itself.

use crate::ast::{BinOp, CodeRange, Expr, ExprLoc, Ident, Literal, STATE_LOOP_LABEL, Stmt, StateRecord, TryStmt};
use crate::env::Env;
use crate::host::CompilerHost;
use crate::trace::LowerTracer;

/// An `Expr::ArrayLit` holding `exc_table`'s rows as `i64` literals, in
/// index order — the literal embedding of the `Vec<i16>` this module builds
/// for use at the one place the emitted AST actually reads it back.
fn table_literal(exc_table: &[i16], at: CodeRange) -> ExprLoc {
    let items = exc_table.iter().map(|&row| ExprLoc::new(at, Expr::Literal(Literal::Int(row as i64)))).collect();
    ExprLoc::new(at, Expr::ArrayLit(items))
}

/// Builds the exception table for `states`, which must already carry final,
/// contiguous ids (`excTable.len() == states.len()`).
pub fn build_exception_table<Tr: LowerTracer>(tracer: &mut Tr, states: &[StateRecord]) -> Vec<i16> {
    let mut table = vec![0i16; states.len()];
    for state in states {
        let idx = usize::try_from(state.id.get()).expect("state ids are non-negative after folding");
        table[idx] = state.exc_handler.table_entry();
    }
    tracer.exception_table_built(table.len());
    table
}

/// Wraps the state dispatch rungs (`DispatchState` plus every concatenated
/// `State`) in the `try`/`except` that routes a raised exception to whatever
/// handler `exc_table` names for the state active when it was raised. Placed
/// *inside* the `while true` the dispatch rungs live in (see
/// [`build_state_loop`]), not around it: per spec §4.E the handler body ends
/// by falling through, and it is that fallthrough — out of the `try`, out of
/// this single loop iteration — that "re-enters the while-loop, dispatching
/// to the handler state" the handler just computed, rather than this module
/// emitting an explicit jump back to the top.
///
/// No-op (returns `rungs` unchanged) when every row of `exc_table` is `0` —
/// an iterator with no `try` anywhere has nothing for this wrapper to route
/// to, and emitting a catch-all around it would only suppress exceptions the
/// caller needs to see.
pub fn wrap_with_catch_all<H: CompilerHost>(env: &mut Env<'_, H>, exc_table: &[i16], rungs: Vec<Stmt>, at: CodeRange) -> Vec<Stmt> {
    if exc_table.iter().all(|&row| row == 0) {
        return rungs;
    }

    let exc_name = Ident::new("__iterlower_exc", at);
    let exc_expr = ExprLoc::new(at, Expr::Name(exc_name.clone()));
    let handler_body = except_handler_body(env, exc_table, exc_expr, at);

    vec![Stmt::Try(TryStmt {
        body: rungs,
        handlers: vec![crate::ast::ExceptHandler { exc_type: None, bound_name: Some(exc_name), body: handler_body }],
        or_else: vec![],
        finally: vec![],
    })]
}

/// The body of the catch-all `except:` clause, following spec §4.E literally:
///
/// ```text
/// state := T[state]
/// if state == 0: raise
/// unrollFinally := (0 < state)
/// unrollUntil   := -1
/// if state < 0: state := -state
/// curExc := getCurrentException()
/// ```
///
/// `closureIterSetupExc(exc)` runs first so the runtime has the just-raised
/// exception staged before anything below reads it back out through
/// `getCurrentException()`. `T` is embedded directly as an `ArrayLit` of the
/// table's own rows rather than a named constant — the minimal AST this crate
/// defines has no top-level `const` declaration to hang one off of, and an
/// inline literal still satisfies the contract in spec §6 ("a `const` array
/// of `int16`, indexed by state id, read-only"): nothing downstream of this
/// pass ever mutates it.
fn except_handler_body<H: CompilerHost>(env: &mut Env<'_, H>, exc_table: &[i16], exc: ExprLoc, at: CodeRange) -> Vec<Stmt> {
    let mut body = vec![env.call_closure_iter_setup_exc(Some(exc), at)];

    let state = env.state_access(at);
    let lookup = ExprLoc::new(
        at,
        Expr::Index {
            object: Box::new(table_literal(exc_table, at)),
            index: Box::new(state),
        },
    );
    body.push(env.assign_state_expr(lookup, at));

    let zero = ExprLoc::new(at, Expr::Literal(Literal::Int(0)));
    let state_is_zero = Env::<H>::eq_expr(env.state_access(at), zero.clone(), at);
    body.push(Stmt::If { test: state_is_zero, body: vec![Stmt::Raise(None)], or_else: vec![] });

    let positive = ExprLoc::new(
        at,
        Expr::BinOp { op: BinOp::Lt, lhs: Box::new(zero.clone()), rhs: Box::new(env.state_access(at)) },
    );
    body.push(env.assign_unroll_finally_expr(positive, at));
    body.push(env.assign_unroll_until(-1, at));

    let state_is_negative = ExprLoc::new(
        at,
        Expr::BinOp { op: BinOp::Lt, lhs: Box::new(env.state_access(at)), rhs: Box::new(zero) },
    );
    let negated = ExprLoc::new(
        at,
        Expr::BinOp { op: BinOp::Sub, lhs: Box::new(ExprLoc::new(at, Expr::Literal(Literal::Int(0)))), rhs: Box::new(env.state_access(at)) },
    );
    body.push(Stmt::If { test: state_is_negative, body: vec![env.assign_state_expr(negated, at)], or_else: vec![] });

    let get_current = env.call_get_current_exception(at);
    body.push(env.assign_cur_exc(get_current, at));
    body
}

/// The synthesized `block stateLoop: while true { try { dispatch;
/// ...states... } except { ... } }` scaffold (the `try`/`except` only
/// present when `exc_table` has a non-zero row) — each state's body, in
/// final-id order, wrapped in an `if state == k` rung so the computed-goto a
/// later pass lowers this into has somewhere concrete to land;
/// `DispatchState` marks the spot a later pass may replace with that
/// lowering.
pub fn build_state_loop<H: CompilerHost>(env: &mut Env<'_, H>, exc_table: &[i16], states: Vec<StateRecord>, at: CodeRange) -> Stmt {
    let mut rungs: Vec<Stmt> = vec![Stmt::DispatchState];
    for state in states {
        rungs.push(Stmt::State(state));
    }
    let body = wrap_with_catch_all(env, exc_table, rungs, at);
    Stmt::Block {
        label: Some(STATE_LOOP_LABEL),
        body: vec![Stmt::While { test: ExprLoc::new(at, Expr::Literal(Literal::Bool(true))), body }],
    }
}
