//! Component F — state-assignment lowering & loop-wrapper markers.
//!
//! By the time [`crate::fold`] returns, every surviving [`crate::ast::StateId`]
//! handle carries its final, contiguous value, but the body is still full of
//! the abstract markers the splitter left behind. This pass turns every one
//! of them into the concrete form spec §4.F names:
//!
//! - `yield e ; goto_state K` becomes `state := K ; return`, with `e` (when
//!   present) deposited into the host's shared iterator-result symbol first
//!   ([`crate::env::Env::assign_closure_iter_result`]) — the channel the
//!   caller reads the yielded value back out of, since the generated
//!   function's own `return` carries no payload.
//! - a standalone `goto_state K` — static or, via `GotoStateDynamic`, a
//!   runtime-computed target — becomes `state := K ; break stateLoop`: a
//!   jump within the *same* call, redispatching the `while true` without
//!   returning to the caller. This applies uniformly whether `K` is a real
//!   state or the exit sentinel; exit carries no special case of its own.
//! - a bare top-level `return e` (one that never went through the
//!   finally-unroll protocol, §4.C) becomes `state := −1 ; return e`.
//!
//! Also resolves every remaining [`crate::ast::Expr::StateRef`] — left behind
//! by [`crate::split`]'s `unrollUntil`/`afterUnroll` assignments — into the
//! literal integer it now names, now that folding has made every id final.

use crate::ast::{AssignTarget, CaseArm, CodeRange, Expr, ExprLoc, GotoTarget, Literal, STATE_LOOP_LABEL, Stmt, TryStmt};
use crate::env::Env;
use crate::host::CompilerHost;

/// Runs state-assignment lowering and state-reference resolution over one
/// state's body (or any nested statement list).
pub fn resolve_state_refs<H: CompilerHost>(env: &mut Env<'_, H>, stmts: Vec<Stmt>) -> Vec<Stmt> {
    lower_list(env, stmts)
}

fn lower_list<H: CompilerHost>(env: &mut Env<'_, H>, stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    let mut iter = stmts.into_iter().peekable();
    while let Some(stmt) = iter.next() {
        match stmt {
            Stmt::Yield(value) => {
                let value = value.map(resolve_expr);
                if matches!(iter.peek(), Some(Stmt::GotoState(GotoTarget::State(_)))) {
                    let Some(Stmt::GotoState(GotoTarget::State(target))) = iter.next() else { unreachable!() };
                    out.extend(lower_yield_then_goto(env, value, &target));
                } else {
                    // The splitter always pairs `Stmt::Yield` with an
                    // immediately-following `goto_state`; reaching here means
                    // malformed input upstream, not a case §4.F names.
                    out.push(Stmt::Yield(value));
                }
            }
            Stmt::GotoState(GotoTarget::State(target)) => out.extend(lower_goto(env, target.get(), CodeRange::synthetic())),
            Stmt::GotoStateDynamic(e) => {
                let e = resolve_expr(e);
                let at = e.pos;
                out.extend(lower_goto_dynamic(env, e, at));
            }
            Stmt::Return(value) => out.extend(lower_return(env, value.map(resolve_expr))),
            other => out.push(lower_stmt(env, other)),
        }
    }
    out
}

fn lower_yield_then_goto<H: CompilerHost>(env: &mut Env<'_, H>, value: Option<ExprLoc>, target: &crate::ast::StateId) -> Vec<Stmt> {
    let at = value.as_ref().map_or_else(CodeRange::synthetic, |v| v.pos);
    let mut out = vec![env.assign_state_int(target.get(), at)];
    if let Some(v) = value {
        out.push(env.assign_closure_iter_result(v, at));
    }
    out.push(Stmt::Return(None));
    out
}

fn lower_goto<H: CompilerHost>(env: &mut Env<'_, H>, target: i64, at: CodeRange) -> Vec<Stmt> {
    vec![env.assign_state_int(target, at), Stmt::Break { label: Some(STATE_LOOP_LABEL) }]
}

fn lower_goto_dynamic<H: CompilerHost>(env: &mut Env<'_, H>, target: ExprLoc, at: CodeRange) -> Vec<Stmt> {
    vec![env.assign_state_expr(target, at), Stmt::Break { label: Some(STATE_LOOP_LABEL) }]
}

fn lower_return<H: CompilerHost>(env: &mut Env<'_, H>, value: Option<ExprLoc>) -> Vec<Stmt> {
    let at = value.as_ref().map_or_else(CodeRange::synthetic, |v| v.pos);
    vec![env.assign_state_int(-1, at), Stmt::Return(value)]
}

fn lower_stmt<H: CompilerHost>(env: &mut Env<'_, H>, stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::ExprStmt(e) => Stmt::ExprStmt(resolve_expr(e)),
        Stmt::VarSection(bindings) => Stmt::VarSection(
            bindings
                .into_iter()
                .map(|b| crate::ast::VarBinding { name: b.name, ty: b.ty, init: b.init.map(resolve_expr) })
                .collect(),
        ),
        Stmt::Assign { target, value } => Stmt::Assign { target: resolve_target(target), value: resolve_expr(value) },
        Stmt::If { test, body, or_else } => Stmt::If { test: resolve_expr(test), body: lower_list(env, body), or_else: lower_list(env, or_else) },
        Stmt::Case { subject, arms, or_else } => Stmt::Case {
            subject: resolve_expr(subject),
            arms: arms
                .into_iter()
                .map(|a| CaseArm { test: resolve_expr(a.test), bindings: lower_list(env, a.bindings), body: lower_list(env, a.body) })
                .collect(),
            or_else: lower_list(env, or_else),
        },
        Stmt::While { test, body } => Stmt::While { test: resolve_expr(test), body: lower_list(env, body) },
        Stmt::Block { label, body } => Stmt::Block { label, body: lower_list(env, body) },
        Stmt::Break { label } => Stmt::Break { label },
        Stmt::Raise(e) => Stmt::Raise(e.map(resolve_expr)),
        Stmt::Try(t) => Stmt::Try(TryStmt {
            body: lower_list(env, t.body),
            handlers: t
                .handlers
                .into_iter()
                .map(|h| crate::ast::ExceptHandler { exc_type: h.exc_type.map(resolve_expr), bound_name: h.bound_name, body: lower_list(env, h.body) })
                .collect(),
            or_else: lower_list(env, t.or_else),
            finally: lower_list(env, t.finally),
        }),
        Stmt::StmtList(stmts) => Stmt::StmtList(lower_list(env, stmts)),
        Stmt::State(mut rec) => {
            rec.body = lower_list(env, rec.body);
            Stmt::State(rec)
        }
        Stmt::DispatchState => Stmt::DispatchState,
        // Handled directly in `lower_list`, which needs sequential lookahead
        // (the `yield`/`goto_state` pairing) that a per-node match can't do.
        Stmt::Yield(_) | Stmt::GotoState(_) | Stmt::GotoStateDynamic(_) | Stmt::Return(_) => {
            unreachable!("lower_list dispatches these variants itself before falling back to lower_stmt")
        }
    }
}

fn resolve_target(target: AssignTarget) -> AssignTarget {
    match target {
        AssignTarget::Name(n) => AssignTarget::Name(n),
        AssignTarget::Attr { object, attr } => AssignTarget::Attr { object: Box::new(resolve_expr(*object)), attr },
    }
}

fn resolve_expr(e: ExprLoc) -> ExprLoc {
    let pos = e.pos;
    let expr = match e.expr {
        Expr::StateRef(id) => Expr::Literal(Literal::Int(id.get())),
        Expr::Literal(l) => Expr::Literal(l),
        Expr::Name(n) => Expr::Name(n),
        Expr::Paren(inner) => Expr::Paren(Box::new(resolve_expr(*inner))),
        Expr::Tuple(items) => Expr::Tuple(items.into_iter().map(resolve_expr).collect()),
        Expr::ArrayLit(items) => Expr::ArrayLit(items.into_iter().map(resolve_expr).collect()),
        Expr::ObjectLit(fields) => Expr::ObjectLit(fields.into_iter().map(|(k, v)| (k, resolve_expr(v))).collect()),
        Expr::Call { callee, args } => Expr::Call { callee: Box::new(resolve_expr(*callee)), args: args.into_iter().map(resolve_expr).collect() },
        Expr::AttrAccess { object, attr } => Expr::AttrAccess { object: Box::new(resolve_expr(*object)), attr },
        Expr::Index { object, index } => Expr::Index { object: Box::new(resolve_expr(*object)), index: Box::new(resolve_expr(*index)) },
        Expr::Cast { value, ty } => Expr::Cast { value: Box::new(resolve_expr(*value)), ty },
        Expr::Deref(inner) => Expr::Deref(Box::new(resolve_expr(*inner))),
        Expr::CheckedRange { lo, hi } => Expr::CheckedRange { lo: Box::new(resolve_expr(*lo)), hi: Box::new(resolve_expr(*hi)) },
        Expr::BinOp { op, lhs, rhs } => Expr::BinOp { op, lhs: Box::new(resolve_expr(*lhs)), rhs: Box::new(resolve_expr(*rhs)) },
        Expr::Yield(inner) => Expr::Yield(inner.map(|b| Box::new(resolve_expr(*b)))),
        // `expr_lower`'s postcondition guarantees no `Expr::Block` survives
        // past component B, so there is nothing left here to resolve.
        Expr::Block(stmts) => Expr::Block(stmts),
    };
    ExprLoc::new(pos, expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodeRange, Ident, StateId};
    use crate::host::test_support::TestHost;

    fn at() -> CodeRange {
        CodeRange::synthetic()
    }

    fn int(v: i64) -> ExprLoc {
        ExprLoc::new(at(), Expr::Literal(Literal::Int(v)))
    }

    #[test]
    fn exit_goto_becomes_state_assign_and_break() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let stmts = vec![Stmt::GotoState(GotoTarget::State(StateId::exit()))];
        let resolved = resolve_state_refs(&mut env, stmts);
        assert_eq!(resolved.len(), 2);
        match &resolved[0] {
            Stmt::Assign { value, .. } => assert_eq!(value.expr, Expr::Literal(Literal::Int(-1))),
            other => panic!("expected state := -1, found {other:?}"),
        }
        assert_eq!(resolved[1], Stmt::Break { label: Some(STATE_LOOP_LABEL) });
    }

    #[test]
    fn real_goto_becomes_state_assign_and_break() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let target = StateId::provisional(3);
        target.set(3);
        let stmts = vec![Stmt::GotoState(GotoTarget::State(target))];
        let resolved = resolve_state_refs(&mut env, stmts);
        assert_eq!(resolved.len(), 2);
        match &resolved[0] {
            Stmt::Assign { value, .. } => assert_eq!(value.expr, Expr::Literal(Literal::Int(3))),
            other => panic!("expected state := 3, found {other:?}"),
        }
        assert_eq!(resolved[1], Stmt::Break { label: Some(STATE_LOOP_LABEL) });
    }

    #[test]
    fn yield_then_goto_becomes_state_assign_result_assign_and_return() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let target = StateId::provisional(1);
        target.set(1);
        let stmts = vec![Stmt::Yield(Some(int(5))), Stmt::GotoState(GotoTarget::State(target))];
        let resolved = resolve_state_refs(&mut env, stmts);
        assert_eq!(resolved.len(), 3);
        match &resolved[0] {
            Stmt::Assign { value, .. } => assert_eq!(value.expr, Expr::Literal(Literal::Int(1))),
            other => panic!("expected state := 1, found {other:?}"),
        }
        match &resolved[1] {
            Stmt::Assign { target: AssignTarget::Name(n), value } => {
                assert_eq!(n.name, crate::ast::Symbol::from("iterResult"));
                assert_eq!(value.expr, Expr::Literal(Literal::Int(5)));
            }
            other => panic!("expected iterResult := 5, found {other:?}"),
        }
        assert_eq!(resolved[2], Stmt::Return(None));
    }

    #[test]
    fn top_level_return_gets_state_minus_one() {
        let mut host = TestHost::without_env(true, "i64");
        let mut env = Env::new(&mut host);
        let stmts = vec![Stmt::Return(Some(int(7)))];
        let resolved = resolve_state_refs(&mut env, stmts);
        assert_eq!(resolved.len(), 2);
        match &resolved[0] {
            Stmt::Assign { value, .. } => assert_eq!(value.expr, Expr::Literal(Literal::Int(-1))),
            other => panic!("expected state := -1, found {other:?}"),
        }
        assert_eq!(resolved[1], Stmt::Return(Some(int(7))));
    }

    #[test]
    fn state_ref_resolves_to_a_literal() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let target = StateId::provisional(7);
        target.set(7);
        let stmts = vec![
            Stmt::Assign {
                target: AssignTarget::Name(Ident::new("afterUnroll_1", at())),
                value: ExprLoc::new(at(), Expr::StateRef(target)),
            },
            Stmt::Raise(None),
        ];
        let resolved = resolve_state_refs(&mut env, stmts);
        match &resolved[0] {
            Stmt::Assign { value, .. } => assert_eq!(value.expr, Expr::Literal(Literal::Int(7))),
            _ => panic!("expected an assignment"),
        }
    }
}
