//! Component C — return-in-try and except-else normalization.
//!
//! These two rewrites don't run as their own whole-tree pass: both need a
//! concrete `StateId` for the nearest enclosing `finally`, which only exists
//! once [`crate::split`] has allocated it while descending into a `try`. So
//! `split` calls straight into these helpers from its own `Try`/`Return`
//! handling, at exactly the point its recursion has that id in hand.

use crate::ast::{CodeRange, GotoTarget, Stmt};
use crate::env::Env;
use crate::error::LowerResult;
use crate::host::CompilerHost;

/// `return e` found lexically inside a `try` whose nearest enclosing
/// `finally` state is `nearest_finally`. Rewritten into the unroll-protocol
/// sequence rather than left as a bare `return`, so the pending
/// `finally` runs before the value actually leaves the function.
pub fn transform_return_in_try<H: CompilerHost>(
    env: &mut Env<'_, H>,
    value: Option<crate::ast::ExprLoc>,
    nearest_finally: &crate::ast::StateId,
    at: CodeRange,
) -> LowerResult<Vec<Stmt>> {
    let mut out = vec![env.assign_unroll_finally(true, at), env.assign_unroll_until(-1, at)];
    if let Some(v) = value {
        out.push(env.assign_tmp_result(v, at)?);
    }
    out.push(env.nullify_cur_exc(at));
    out.push(Stmt::GotoState(GotoTarget::State(nearest_finally.clone())));
    Ok(out)
}

/// Appends the implicit fallback branch to a synthesized except dispatch
/// cascade that has no handler matching every exception type,
/// `addElseToExcept`): re-raise by unrolling straight to the enclosing
/// `finally`.
pub fn add_else_to_except<H: CompilerHost>(env: &mut Env<'_, H>, nearest_finally: &crate::ast::StateId, at: CodeRange) -> Vec<Stmt> {
    let cur_exc = env.call_get_current_exception(at);
    vec![
        env.assign_unroll_finally(true, at),
        env.assign_unroll_until(-1, at),
        env.assign_cur_exc(cur_exc, at),
        Stmt::GotoState(GotoTarget::State(nearest_finally.clone())),
    ]
}
