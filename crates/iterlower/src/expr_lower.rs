//! Component B — statement-list-expression lowering.
//!
//! Rewrites every expression subtree that contains a `yield` into a sequence
//! of statements ending in a temporary read, so that once this pass is done
//! no `Expr` anywhere in the tree can suspend mid-evaluation. Everything
//! downstream (Components C through G) only ever has to reason about `yield`
//! as a full statement.
//!
//! The postcondition is checked explicitly at the end of
//! [`lower_expressions`] rather than trusted: [`LowerError::YieldInExpression`]
//! is a bug in this module, not in the caller's input.

use crate::ast::{
    AssignTarget, BinOp, CaseArm, CodeRange, ExceptHandler, Expr, ExprLoc, Ident, Literal, Stmt, Symbol, TryStmt, TypeRef,
    VarBinding,
};
use crate::env::Env;
use crate::error::{LowerError, LowerResult};
use crate::host::CompilerHost;

/// Type placeholder for synthesized temporaries whose real type this pass
/// cannot name — the full type system is out of scope here. Hosts that care recover
/// it from context; [`host::test_support::TestHost`](crate::host::test_support::TestHost)
/// ignores it entirely.
fn unknown_ty() -> TypeRef {
    TypeRef("_".to_owned())
}

fn bool_lit(value: bool, at: CodeRange) -> ExprLoc {
    ExprLoc::new(at, Expr::Literal(Literal::Bool(value)))
}

/// `cond == false`, used where the AST has no dedicated unary `not`.
fn negate(cond: ExprLoc, at: CodeRange) -> ExprLoc {
    ExprLoc::new(
        at,
        Expr::BinOp {
            op: BinOp::Eq,
            lhs: Box::new(cond),
            rhs: Box::new(bool_lit(false, at)),
        },
    )
}

/// Entry point: lowers an iterator body in place. Statement lists nested
/// inside (branch bodies, loop bodies, try/except/finally) are lowered
/// recursively by the same pass.
pub fn lower_expressions<H: CompilerHost>(env: &mut Env<'_, H>, body: Vec<Stmt>) -> LowerResult<Vec<Stmt>> {
    let lowered = lower_stmts(env, body)?;
    assert_no_yield_in_expr(&lowered)?;
    Ok(lowered)
}

fn lower_stmts<H: CompilerHost>(env: &mut Env<'_, H>, stmts: Vec<Stmt>) -> LowerResult<Vec<Stmt>> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        out.extend(lower_stmt(env, stmt)?);
    }
    Ok(out)
}

fn lower_stmt<H: CompilerHost>(env: &mut Env<'_, H>, stmt: Stmt) -> LowerResult<Vec<Stmt>> {
    match stmt {
        Stmt::ExprStmt(e) => {
            let (mut out, e2) = lower_expr(env, e)?;
            out.push(Stmt::ExprStmt(e2));
            Ok(out)
        }
        Stmt::VarSection(bindings) => {
            let mut out = Vec::new();
            for b in bindings {
                match b.init {
                    Some(init) => {
                        let (pre, init2) = lower_expr(env, init)?;
                        out.extend(pre);
                        out.push(Stmt::VarSection(vec![VarBinding {
                            name: b.name,
                            ty: b.ty,
                            init: Some(init2),
                        }]));
                    }
                    None => out.push(Stmt::VarSection(vec![VarBinding {
                        name: b.name,
                        ty: b.ty,
                        init: None,
                    }])),
                }
            }
            Ok(out)
        }
        Stmt::Assign { target, value } => {
            let mut out = Vec::new();
            let target2 = match target {
                AssignTarget::Name(id) => AssignTarget::Name(id),
                AssignTarget::Attr { object, attr } => {
                    if object.contains_yield() {
                        let (pre, object2) = lower_expr(env, *object)?;
                        out.extend(pre);
                        AssignTarget::Attr {
                            object: Box::new(object2),
                            attr,
                        }
                    } else {
                        AssignTarget::Attr { object, attr }
                    }
                }
            };
            let (pre, value2) = lower_expr(env, value)?;
            out.extend(pre);
            out.push(Stmt::Assign { target: target2, value: value2 });
            Ok(out)
        }
        Stmt::If { test, body, or_else } => {
            let (mut out, test2) = lower_expr(env, test)?;
            let body2 = lower_stmts(env, body)?;
            let or_else2 = lower_stmts(env, or_else)?;
            out.push(Stmt::If { test: test2, body: body2, or_else: or_else2 });
            Ok(out)
        }
        Stmt::Case { subject, arms, or_else } => {
            let (mut out, subject2) = lower_expr(env, subject)?;
            let mut arms2 = Vec::with_capacity(arms.len());
            for arm in arms {
                if arm.test.contains_yield() {
                    return Err(LowerError::UnsupportedConstruct {
                        what: "yield in case-arm test",
                        at: arm.test.pos,
                    });
                }
                let bindings2 = lower_stmts(env, arm.bindings)?;
                let body2 = lower_stmts(env, arm.body)?;
                arms2.push(CaseArm { test: arm.test, bindings: bindings2, body: body2 });
            }
            let or_else2 = lower_stmts(env, or_else)?;
            out.push(Stmt::Case { subject: subject2, arms: arms2, or_else: or_else2 });
            Ok(out)
        }
        Stmt::While { test, body } => lower_while(env, test, body),
        Stmt::Block { label, body } => {
            let body2 = lower_stmts(env, body)?;
            Ok(vec![Stmt::Block { label, body: body2 }])
        }
        Stmt::Break { label } => Ok(vec![Stmt::Break { label }]),
        Stmt::Return(e) => lower_optional_expr_stmt(env, e, Stmt::Return),
        Stmt::Raise(e) => lower_optional_expr_stmt(env, e, Stmt::Raise),
        Stmt::Yield(e) => lower_optional_expr_stmt(env, e, Stmt::Yield),
        Stmt::Try(t) => {
            let body2 = lower_stmts(env, t.body)?;
            let mut handlers2 = Vec::with_capacity(t.handlers.len());
            for h in t.handlers {
                if h.exc_type.as_ref().is_some_and(ExprLoc::contains_yield) {
                    return Err(LowerError::UnsupportedConstruct {
                        what: "yield in except type test",
                        at: h.exc_type.as_ref().expect("checked above").pos,
                    });
                }
                let body2h = lower_stmts(env, h.body)?;
                handlers2.push(ExceptHandler { exc_type: h.exc_type, bound_name: h.bound_name, body: body2h });
            }
            let or_else2 = lower_stmts(env, t.or_else)?;
            let finally2 = lower_stmts(env, t.finally)?;
            Ok(vec![Stmt::Try(TryStmt { body: body2, handlers: handlers2, or_else: or_else2, finally: finally2 })])
        }
        Stmt::StmtList(stmts) => lower_stmts(env, stmts),
        Stmt::State(_) => Err(LowerError::UnsupportedConstruct { what: "State node in pass input", at: CodeRange::synthetic() }),
        Stmt::GotoState(_) | Stmt::GotoStateDynamic(_) | Stmt::DispatchState => {
            Err(LowerError::UnsupportedConstruct { what: "GotoState node in pass input", at: CodeRange::synthetic() })
        }
    }
}

/// Shared shape for `return`/`raise`/statement-`yield`: lower the optional
/// operand, keep any hoisted prefix, rewrap in the same statement kind.
fn lower_optional_expr_stmt<H: CompilerHost>(
    env: &mut Env<'_, H>,
    e: Option<ExprLoc>,
    wrap: impl FnOnce(Option<ExprLoc>) -> Stmt,
) -> LowerResult<Vec<Stmt>> {
    match e {
        Some(e) => {
            let (mut out, e2) = lower_expr(env, e)?;
            out.push(wrap(Some(e2)));
            Ok(out)
        }
        None => Ok(vec![wrap(None)]),
    }
}

/// `while` whose condition contains a `yield` cannot be evaluated in place
/// wrapped in a fresh labeled block so the condition becomes an
/// ordinary in-body check that `break`s out, and the `while` itself tests a
/// constant `true`.
fn lower_while<H: CompilerHost>(env: &mut Env<'_, H>, test: ExprLoc, body: Vec<Stmt>) -> LowerResult<Vec<Stmt>> {
    let pos = test.pos;
    if !test.contains_yield() {
        let body2 = lower_stmts(env, body)?;
        return Ok(vec![Stmt::While { test, body: body2 }]);
    }
    let label = crate::ast::BlockLabel(env.fresh_id());
    let (cond_pre, cond2) = lower_expr(env, test)?;
    let mut loop_body = cond_pre;
    loop_body.push(Stmt::If {
        test: negate(cond2, pos),
        body: vec![Stmt::Break { label: Some(label) }],
        or_else: vec![],
    });
    loop_body.extend(lower_stmts(env, body)?);
    let inner_while = Stmt::While { test: bool_lit(true, pos), body: loop_body };
    Ok(vec![Stmt::Block { label: Some(label), body: vec![inner_while] }])
}

/// Lowers a single expression, returning statements that must run before it
/// and a rewritten expression guaranteed free of `yield` once this returns.
fn lower_expr<H: CompilerHost>(env: &mut Env<'_, H>, e: ExprLoc) -> LowerResult<(Vec<Stmt>, ExprLoc)> {
    let pos = e.pos;
    match e.expr {
        Expr::Literal(_) | Expr::Name(_) => Ok((vec![], e)),
        Expr::Yield(inner) => {
            let (mut pre, inner2) = match inner {
                Some(inner) => {
                    let (pre, inner2) = lower_expr(env, *inner)?;
                    (pre, Some(inner2))
                }
                None => (vec![], None),
            };
            pre.push(Stmt::Yield(inner2));
            let result = env.closure_iter_result_expr(pos);
            Ok((pre, result))
        }
        Expr::Paren(inner) => {
            let (pre, inner2) = lower_expr(env, *inner)?;
            Ok((pre, ExprLoc::new(pos, Expr::Paren(Box::new(inner2)))))
        }
        Expr::Deref(inner) => lower_single_child(env, *inner, pos, "deref", |v| Expr::Deref(Box::new(v))),
        Expr::Cast { value, ty } => {
            let ty2 = ty.clone();
            lower_single_child(env, *value, pos, "cast", move |v| Expr::Cast { value: Box::new(v), ty: ty2 })
        }
        Expr::AttrAccess { object, attr } => {
            let attr2 = attr.clone();
            lower_single_child(env, *object, pos, "recv", move |v| Expr::AttrAccess { object: Box::new(v), attr: attr2 })
        }
        Expr::Tuple(items) => {
            let (pre, items2) = hoist_siblings(env, items, false)?;
            Ok((pre, ExprLoc::new(pos, Expr::Tuple(items2))))
        }
        Expr::ArrayLit(items) => {
            let (pre, items2) = hoist_siblings(env, items, false)?;
            Ok((pre, ExprLoc::new(pos, Expr::ArrayLit(items2))))
        }
        Expr::ObjectLit(fields) => {
            let (keys, values): (Vec<Symbol>, Vec<ExprLoc>) = fields.into_iter().unzip();
            let (pre, values2) = hoist_siblings(env, values, false)?;
            let fields2 = keys.into_iter().zip(values2).collect();
            Ok((pre, ExprLoc::new(pos, Expr::ObjectLit(fields2))))
        }
        Expr::Call { callee, args } => {
            let mut all = Vec::with_capacity(args.len() + 1);
            all.push(*callee);
            all.extend(args);
            let (pre, mut lowered) = hoist_siblings(env, all, true)?;
            let callee2 = lowered.remove(0);
            Ok((pre, ExprLoc::new(pos, Expr::Call { callee: Box::new(callee2), args: lowered })))
        }
        Expr::Index { object, index } => {
            let (pre, mut items2) = hoist_siblings(env, vec![*object, *index], false)?;
            let index2 = items2.pop().expect("two items hoisted");
            let object2 = items2.pop().expect("two items hoisted");
            Ok((pre, ExprLoc::new(pos, Expr::Index { object: Box::new(object2), index: Box::new(index2) })))
        }
        Expr::CheckedRange { lo, hi } => {
            let (pre, mut items2) = hoist_siblings(env, vec![*lo, *hi], false)?;
            let hi2 = items2.pop().expect("two items hoisted");
            let lo2 = items2.pop().expect("two items hoisted");
            Ok((pre, ExprLoc::new(pos, Expr::CheckedRange { lo: Box::new(lo2), hi: Box::new(hi2) })))
        }
        Expr::BinOp { op, lhs, rhs } => {
            if op.is_short_circuit() && (lhs.contains_yield() || rhs.contains_yield()) {
                lower_short_circuit(env, op, *lhs, *rhs, pos)
            } else {
                let (pre, mut items2) = hoist_siblings(env, vec![*lhs, *rhs], false)?;
                let rhs2 = items2.pop().expect("two items hoisted");
                let lhs2 = items2.pop().expect("two items hoisted");
                Ok((pre, ExprLoc::new(pos, Expr::BinOp { op, lhs: Box::new(lhs2), rhs: Box::new(rhs2) })))
            }
        }
        Expr::Block(stmts) => lower_block_as_expr(env, stmts, pos),
    }
}

/// Single-child node forms (`deref`, `cast`, dot access): hoist the child
/// into a temporary only when it actually contains a `yield`; otherwise
/// leave it inline unchanged.
fn lower_single_child<H: CompilerHost>(
    env: &mut Env<'_, H>,
    child: ExprLoc,
    pos: CodeRange,
    hint: &str,
    rebuild: impl FnOnce(ExprLoc) -> Expr,
) -> LowerResult<(Vec<Stmt>, ExprLoc)> {
    if !child.contains_yield() {
        return Ok((vec![], ExprLoc::new(pos, rebuild(child))));
    }
    let (mut pre, child2) = lower_expr(env, child)?;
    let child_pos = child2.pos;
    let (name, read) = env.new_temp_var_expr(unknown_ty(), hint, child_pos);
    pre.push(env.assign_temp(&name, child2, child_pos));
    Ok((pre, ExprLoc::new(pos, rebuild(read))))
}

/// Hoists a left-to-right sibling list (container elements, call arguments).
/// Any item that itself contains a `yield` is lowered and its value pinned
/// into a fresh temporary. When `propagate_calls` is set (call argument
/// lists), every sibling at or after the first hoisted one that is itself a
/// call expression is hoisted too, even if it has no `yield` of its own —
/// otherwise introducing temporaries for only *some* arguments would
/// reorder call-to-call side effects relative to the source.
fn hoist_siblings<H: CompilerHost>(
    env: &mut Env<'_, H>,
    items: Vec<ExprLoc>,
    propagate_calls: bool,
) -> LowerResult<(Vec<Stmt>, Vec<ExprLoc>)> {
    let mut hoisted = Vec::new();
    let mut out = Vec::with_capacity(items.len());
    let mut triggered = false;
    for item in items {
        let had_yield = item.contains_yield();
        let is_call = matches!(item.expr, Expr::Call { .. });
        if had_yield {
            let (pre, lowered) = lower_expr(env, item)?;
            hoisted.extend(pre);
            let item_pos = lowered.pos;
            let (name, read) = env.new_temp_var_expr(unknown_ty(), "arg", item_pos);
            hoisted.push(env.assign_temp(&name, lowered, item_pos));
            out.push(read);
            triggered = true;
        } else if propagate_calls && triggered && is_call {
            let item_pos = item.pos;
            let (name, read) = env.new_temp_var_expr(unknown_ty(), "arg", item_pos);
            hoisted.push(env.assign_temp(&name, item, item_pos));
            out.push(read);
        } else {
            out.push(item);
        }
    }
    Ok((hoisted, out))
}

/// Short-circuit `and`/`or` where one side contains a `yield`: naively
/// hoisting both sides unconditionally would evaluate the `yield` even when
/// short-circuiting should have skipped it, so this rewrites into an
/// explicit `if` that only evaluates the right-hand side when reachable.
fn lower_short_circuit<H: CompilerHost>(
    env: &mut Env<'_, H>,
    op: BinOp,
    lhs: ExprLoc,
    rhs: ExprLoc,
    pos: CodeRange,
) -> LowerResult<(Vec<Stmt>, ExprLoc)> {
    let (mut hoisted, lhs2) = lower_expr(env, lhs)?;
    let (name, read) = env.new_temp_var_expr(TypeRef("bool".to_owned()), "shortcircuit", pos);
    let (rhs_pre, rhs2) = lower_expr(env, rhs)?;
    let mut rhs_branch = rhs_pre;
    rhs_branch.push(env.assign_temp(&name, rhs2, pos));
    let (body, or_else) = match op {
        BinOp::And => (rhs_branch, vec![env.assign_temp(&name, bool_lit(false, pos), pos)]),
        BinOp::Or => (vec![env.assign_temp(&name, bool_lit(true, pos), pos)], rhs_branch),
        _ => return Err(LowerError::internal("lower_short_circuit called on non short-circuit operator")),
    };
    hoisted.push(Stmt::If { test: lhs2, body, or_else });
    Ok((hoisted, read))
}

/// `block`-as-expression, transitioned to statement form, with a
/// fresh temporary capturing whatever value the last statement produces.
/// Branch-producing tails (`if`/`case`/`try`) recurse so every branch ends up
/// assigning the same temporary rather than only the last statement.
fn lower_block_as_expr<H: CompilerHost>(env: &mut Env<'_, H>, stmts: Vec<Stmt>, pos: CodeRange) -> LowerResult<(Vec<Stmt>, ExprLoc)> {
    if stmts.is_empty() {
        return Ok((vec![], ExprLoc::new(pos, Expr::Literal(Literal::Unit))));
    }
    let temp = env.new_temp_var(unknown_ty(), "blockval");
    let hoisted = materialize_tail(env, stmts, &temp)?;
    let read = ExprLoc::new(pos, Expr::Name(Ident::new(temp, pos)));
    Ok((hoisted, read))
}

/// Lowers `body` as a value-producing tail position: every statement but the
/// last is lowered normally; the last is rewritten (recursively, through
/// nested `if`/`case`/`try` branches) to assign `temp` instead of merely
/// evaluating. A branch whose tail diverges (`return`/`raise`/`break`/
/// `yield`-as-statement) is left alone — control never reaches a read of
/// `temp` along that path.
fn materialize_tail<H: CompilerHost>(env: &mut Env<'_, H>, mut body: Vec<Stmt>, temp: &Symbol) -> LowerResult<Vec<Stmt>> {
    let Some(last) = body.pop() else {
        return Ok(vec![]);
    };
    let mut out = lower_stmts(env, body)?;
    match last {
        Stmt::ExprStmt(e) => {
            let pos = e.pos;
            let (pre, e2) = lower_expr(env, e)?;
            out.extend(pre);
            out.push(env.assign_temp(temp, e2, pos));
        }
        Stmt::If { test, body, or_else } => {
            let (pre, test2) = lower_expr(env, test)?;
            out.extend(pre);
            let body2 = materialize_tail(env, body, temp)?;
            let or_else2 = materialize_tail(env, or_else, temp)?;
            out.push(Stmt::If { test: test2, body: body2, or_else: or_else2 });
        }
        Stmt::Case { subject, arms, or_else } => {
            let (pre, subject2) = lower_expr(env, subject)?;
            out.extend(pre);
            let mut arms2 = Vec::with_capacity(arms.len());
            for arm in arms {
                if arm.test.contains_yield() {
                    return Err(LowerError::UnsupportedConstruct {
                        what: "yield in case-arm test",
                        at: arm.test.pos,
                    });
                }
                let bindings2 = lower_stmts(env, arm.bindings)?;
                let body2 = materialize_tail(env, arm.body, temp)?;
                arms2.push(CaseArm { test: arm.test, bindings: bindings2, body: body2 });
            }
            let or_else2 = materialize_tail(env, or_else, temp)?;
            out.push(Stmt::Case { subject: subject2, arms: arms2, or_else: or_else2 });
        }
        Stmt::Try(t) => {
            let body2 = materialize_tail(env, t.body, temp)?;
            let mut handlers2 = Vec::with_capacity(t.handlers.len());
            for h in t.handlers {
                if h.exc_type.as_ref().is_some_and(ExprLoc::contains_yield) {
                    return Err(LowerError::UnsupportedConstruct {
                        what: "yield in except type test",
                        at: h.exc_type.as_ref().expect("checked above").pos,
                    });
                }
                let body2h = materialize_tail(env, h.body, temp)?;
                handlers2.push(ExceptHandler { exc_type: h.exc_type, bound_name: h.bound_name, body: body2h });
            }
            let or_else2 = materialize_tail(env, t.or_else, temp)?;
            let finally2 = lower_stmts(env, t.finally)?;
            out.push(Stmt::Try(TryStmt { body: body2, handlers: handlers2, or_else: or_else2, finally: finally2 }));
        }
        Stmt::Block { label, body } => {
            let body2 = materialize_tail(env, body, temp)?;
            out.push(Stmt::Block { label, body: body2 });
        }
        Stmt::StmtList(inner) => {
            out.extend(materialize_tail(env, inner, temp)?);
        }
        other => out.extend(lower_stmt(env, other)?),
    }
    Ok(out)
}

fn assert_no_yield_in_expr(stmts: &[Stmt]) -> LowerResult<()> {
    for stmt in stmts {
        check_stmt(stmt)?;
    }
    Ok(())
}

fn check_stmt(stmt: &Stmt) -> LowerResult<()> {
    match stmt {
        Stmt::ExprStmt(e) => check_expr(e),
        Stmt::Assign { target, value } => {
            if let AssignTarget::Attr { object, .. } = target {
                check_expr(object)?;
            }
            check_expr(value)
        }
        Stmt::VarSection(bindings) => {
            for b in bindings {
                if let Some(init) = &b.init {
                    check_expr(init)?;
                }
            }
            Ok(())
        }
        Stmt::If { test, body, or_else } => {
            check_expr(test)?;
            assert_no_yield_in_expr(body)?;
            assert_no_yield_in_expr(or_else)
        }
        Stmt::Case { subject, arms, or_else } => {
            check_expr(subject)?;
            for arm in arms {
                check_expr(&arm.test)?;
                assert_no_yield_in_expr(&arm.bindings)?;
                assert_no_yield_in_expr(&arm.body)?;
            }
            assert_no_yield_in_expr(or_else)
        }
        Stmt::While { test, body } => {
            check_expr(test)?;
            assert_no_yield_in_expr(body)
        }
        Stmt::Block { body, .. } => assert_no_yield_in_expr(body),
        Stmt::Break { .. } => Ok(()),
        Stmt::Return(e) | Stmt::Raise(e) | Stmt::Yield(e) => {
            if let Some(e) = e {
                check_expr(e)?;
            }
            Ok(())
        }
        Stmt::Try(t) => {
            assert_no_yield_in_expr(&t.body)?;
            for h in &t.handlers {
                if let Some(ty) = &h.exc_type {
                    check_expr(ty)?;
                }
                assert_no_yield_in_expr(&h.body)?;
            }
            assert_no_yield_in_expr(&t.or_else)?;
            assert_no_yield_in_expr(&t.finally)
        }
        Stmt::StmtList(inner) => assert_no_yield_in_expr(inner),
        Stmt::State(s) => assert_no_yield_in_expr(&s.body),
        Stmt::GotoState(_) | Stmt::GotoStateDynamic(_) | Stmt::DispatchState => Ok(()),
    }
}

fn check_expr(e: &ExprLoc) -> LowerResult<()> {
    match &e.expr {
        Expr::Yield(_) | Expr::Block(_) => Err(LowerError::YieldInExpression { at: e.pos }),
        Expr::Literal(_) | Expr::Name(_) => Ok(()),
        Expr::Paren(x) | Expr::Deref(x) => check_expr(x),
        Expr::Tuple(items) | Expr::ArrayLit(items) => {
            for i in items {
                check_expr(i)?;
            }
            Ok(())
        }
        Expr::ObjectLit(fields) => {
            for (_, v) in fields {
                check_expr(v)?;
            }
            Ok(())
        }
        Expr::Call { callee, args } => {
            check_expr(callee)?;
            for a in args {
                check_expr(a)?;
            }
            Ok(())
        }
        Expr::AttrAccess { object, .. } => check_expr(object),
        Expr::Index { object, index } => {
            check_expr(object)?;
            check_expr(index)
        }
        Expr::Cast { value, .. } => check_expr(value),
        Expr::CheckedRange { lo, hi } => {
            check_expr(lo)?;
            check_expr(hi)
        }
        Expr::BinOp { lhs, rhs, .. } => {
            check_expr(lhs)?;
            check_expr(rhs)
        }
        Expr::StateRef(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::TestHost;
    use pretty_assertions::assert_eq;

    fn pos() -> CodeRange {
        CodeRange::synthetic()
    }

    fn name(s: &str) -> ExprLoc {
        ExprLoc::new(pos(), Expr::Name(Ident::new(s, pos())))
    }

    fn int(v: i64) -> ExprLoc {
        ExprLoc::new(pos(), Expr::Literal(Literal::Int(v)))
    }

    fn yield_expr(v: ExprLoc) -> ExprLoc {
        ExprLoc::new(pos(), Expr::Yield(Some(Box::new(v))))
    }

    #[test]
    fn binop_with_yielding_operand_hoists_to_a_statement() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let e = ExprLoc::new(
            pos(),
            Expr::BinOp {
                op: BinOp::Add,
                lhs: Box::new(name("x")),
                rhs: Box::new(yield_expr(int(1))),
            },
        );
        let (hoisted, result) = lower_expr(&mut env, e).unwrap();
        assert_eq!(hoisted.len(), 2, "expected a yield statement plus a temp assignment: {hoisted:?}");
        assert!(matches!(hoisted[0], Stmt::Yield(Some(_))));
        assert!(matches!(hoisted[1], Stmt::Assign { .. }));
        assert!(matches!(result.expr, Expr::BinOp { .. }));
    }

    #[test]
    fn tuple_hoists_only_the_yielding_element() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let e = ExprLoc::new(pos(), Expr::Tuple(vec![name("a"), yield_expr(int(2)), name("b")]));
        let (hoisted, result) = lower_expr(&mut env, e).unwrap();
        assert_eq!(hoisted.len(), 2);
        let Expr::Tuple(items) = result.expr else { panic!("expected tuple") };
        assert!(matches!(items[0].expr, Expr::Name(_)));
        assert!(matches!(items[1].expr, Expr::Name(_)), "yielding element should read back a temp");
        assert!(matches!(items[2].expr, Expr::Name(_)));
    }

    #[test]
    fn call_args_after_a_yielding_one_are_all_hoisted() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let e = ExprLoc::new(
            pos(),
            Expr::Call {
                callee: Box::new(name("f")),
                args: vec![yield_expr(int(1)), ExprLoc::new(pos(), Expr::Call { callee: Box::new(name("g")), args: vec![] })],
            },
        );
        let (hoisted, result) = lower_expr(&mut env, e).unwrap();
        // one yield stmt + one assign for the yielding arg, one assign for the sibling call
        assert_eq!(hoisted.len(), 3);
        let Expr::Call { args, .. } = result.expr else { panic!("expected call") };
        assert!(matches!(args[0].expr, Expr::Name(_)));
        assert!(matches!(args[1].expr, Expr::Name(_)), "sibling call must also be pinned to a temp");
    }

    #[test]
    fn short_circuit_and_with_yield_becomes_explicit_if() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let e = ExprLoc::new(
            pos(),
            Expr::BinOp {
                op: BinOp::And,
                lhs: Box::new(name("ready")),
                rhs: Box::new(yield_expr(int(3))),
            },
        );
        let (hoisted, result) = lower_expr(&mut env, e).unwrap();
        assert_eq!(hoisted.len(), 1);
        let Stmt::If { test, body, or_else } = &hoisted[0] else { panic!("expected an if") };
        assert!(matches!(test.expr, Expr::Name(_)));
        assert!(body.iter().any(|s| matches!(s, Stmt::Yield(Some(_)))), "rhs yield must stay inside the true branch");
        assert_eq!(or_else.len(), 1);
        assert!(matches!(result.expr, Expr::Name(_)));
    }

    #[test]
    fn while_with_yielding_condition_wraps_in_labeled_block() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let out = lower_stmt(
            &mut env,
            Stmt::While {
                test: yield_expr(int(0)),
                body: vec![Stmt::ExprStmt(name("x"))],
            },
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        let Stmt::Block { label, body } = &out[0] else { panic!("expected a labeled block") };
        assert!(label.is_some());
        assert_eq!(body.len(), 1);
        let Stmt::While { test, body: inner } = &body[0] else { panic!("expected the inner while") };
        assert!(matches!(test.expr, Expr::Literal(Literal::Bool(true))));
        assert!(inner.iter().any(|s| matches!(s, Stmt::Yield(Some(_)))));
        assert!(inner.iter().any(|s| matches!(s, Stmt::If { .. })), "condition check must become an if-break");
    }

    #[test]
    fn if_expression_materializes_every_branch_into_the_same_temp() {
        let mut host = TestHost::without_env(false, "()");
        let mut env = Env::new(&mut host);
        let block = Expr::Block(vec![Stmt::If {
            test: name("cond"),
            body: vec![Stmt::ExprStmt(int(1))],
            or_else: vec![Stmt::ExprStmt(int(2))],
        }]);
        let (hoisted, result) = lower_expr(&mut env, ExprLoc::new(pos(), block)).unwrap();
        assert_eq!(hoisted.len(), 1);
        let Stmt::If { body, or_else, .. } = &hoisted[0] else { panic!("expected if") };
        assert!(matches!(body[0], Stmt::Assign { .. }));
        assert!(matches!(or_else[0], Stmt::Assign { .. }));
        assert!(matches!(result.expr, Expr::Name(_)));
    }

    #[test]
    fn postcondition_rejects_leftover_yield_expression() {
        let stmts = vec![Stmt::ExprStmt(yield_expr(int(1)))];
        let err = assert_no_yield_in_expr(&stmts).unwrap_err();
        assert!(matches!(err, LowerError::YieldInExpression { .. }));
    }
}
