//! Component D — the state-splitter.
//!
//! The centerpiece of this pass. Walks a yield-free-in-expressions
//! body (component B's postcondition) and produces the list of [`StateRecord`]s
//! that make up the synthesized state machine, threading two pieces of
//! context through the recursion: the `outState` a fragment falls through to
//! when it finishes, and the map of breakable `block` scopes currently in
//! view.
//!
//! The `hasControlFlow` predicate (contains `yield` or `break`
//! transitively) decides where a statement list must be split open. This
//! module additionally treats a bare `return` as control-flow-requiring
//! whenever it is lexically inside a `try` with a pending `finally` (see
//! `DESIGN.md` — the literal predicate only names `yield`/`break`, but a
//! `return` anywhere under such a `try` still needs component C's
//! finally-unroll rewrite, even on a branch with no `yield` of its own).

use ahash::AHashMap;

use crate::ast::{
    AssignTarget, BlockLabel, CaseArm, CodeRange, ExcHandler, ExceptHandler, Expr, ExprLoc, GotoTarget, Literal, Stmt,
    StateId, StateRecord, TryStmt, stmt_contains_break, stmt_contains_yield, stmt_contains_return,
};
use crate::env::Env;
use crate::error::{LowerError, LowerResult};
use crate::host::{CompilerHost, is_instance_test};
use crate::trace::LowerTracer;

/// Where a labeled `block` resolves a `break` to ("Breakable
/// scopes").
#[derive(Clone)]
struct BreakTarget {
    out_state: StateId,
    nearest_finally: Option<StateId>,
}

/// Context threaded through the recursive descent: the enclosing `finally`
/// (if any) a `return`/unhandled exception must unroll through, and the
/// handler newly-created states in the current region should carry (the
/// per-region `excHandler` wiring).
#[derive(Clone, Default)]
struct Ctx {
    nearest_finally: Option<StateId>,
    handler: Option<ExcHandler>,
}

impl Ctx {
    fn handler_or_none(&self) -> ExcHandler {
        self.handler.clone().unwrap_or(ExcHandler::None)
    }
}

fn needs_split(stmt: &Stmt, ctx: &Ctx) -> bool {
    stmt_contains_yield(stmt) || stmt_contains_break(stmt) || (ctx.nearest_finally.is_some() && stmt_contains_return(stmt))
}

/// `unrollUntil` sentinel for a `break` whose target block has no `finally`
/// of its own to stop at — the unroll chain must run every remaining
/// enclosing `finally` and then jump straight to `afterUnroll`, rather than
/// stopping at a particular finally's id (the `break` case names the
/// stopping finally by id; this crate needs a distinct sentinel for "there
/// isn't one" since state ids are non-negative and `-1` is already spoken for
/// by full `return`/exception unrolls).
const UNROLL_UNTIL_BREAK_TO_OUTERMOST: i64 = -2;

pub struct Splitter<'e, 'h, H: CompilerHost, Tr: LowerTracer> {
    env: &'e mut Env<'h, H>,
    tracer: &'e mut Tr,
    states: Vec<StateRecord>,
    labels: AHashMap<BlockLabel, BreakTarget>,
}

impl<'e, 'h, H: CompilerHost, Tr: LowerTracer> Splitter<'e, 'h, H, Tr> {
    fn new(env: &'e mut Env<'h, H>, tracer: &'e mut Tr) -> Self {
        Self { env, tracer, states: Vec::new(), labels: AHashMap::new() }
    }

    fn alloc_state(&mut self) -> StateId {
        StateId::provisional(self.states.len() as i64 + 10_000)
    }

    fn emit_state(&mut self, id: StateId, body: Vec<Stmt>, handler: ExcHandler) {
        self.tracer.state_created(id.get(), "split");
        self.states.push(StateRecord { id, body, exc_handler: handler });
    }

    /// Ensures `stmts` ends in `goto_state(out)`; splits off a fresh state at
    /// the first statement that `needs_split` under `ctx`.
    fn split_list(&mut self, stmts: Vec<Stmt>, out: &StateId, ctx: &Ctx) -> LowerResult<Vec<Stmt>> {
        let split_at = stmts.iter().position(|s| needs_split(s, ctx));
        let Some(i) = split_at else {
            let mut body = stmts;
            body.push(Stmt::GotoState(GotoTarget::State(out.clone())));
            return Ok(body);
        };
        let mut stmts = stmts;
        let suffix = stmts.split_off(i + 1);
        let target = stmts.remove(i);
        let mut head = stmts;
        if suffix.is_empty() {
            head.extend(self.split_stmt(target, out, ctx)?);
            Ok(head)
        } else {
            let s_prime = self.alloc_state();
            head.extend(self.split_stmt(target, &s_prime, ctx)?);
            let suffix_body = self.split_list(suffix, out, ctx)?;
            self.emit_state(s_prime, suffix_body, ctx.handler_or_none());
            Ok(head)
        }
    }

    /// Lowers one control-flow-bearing statement in place, per a per-kind
    /// table. The result replaces the statement's original
    /// position in whatever list called this.
    fn split_stmt(&mut self, stmt: Stmt, out: &StateId, ctx: &Ctx) -> LowerResult<Vec<Stmt>> {
        match stmt {
            Stmt::Yield(e) => Ok(vec![Stmt::Yield(e), Stmt::GotoState(GotoTarget::State(out.clone()))]),
            Stmt::Return(e) => match &ctx.nearest_finally {
                Some(f) => crate::try_pre::transform_return_in_try(self.env, e, f, CodeRange::synthetic()),
                None => Ok(vec![Stmt::Return(e)]),
            },
            Stmt::If { test, body, or_else } => {
                let body2 = self.split_list(body, out, ctx)?;
                let or_else2 = if or_else.is_empty() {
                    vec![Stmt::GotoState(GotoTarget::State(out.clone()))]
                } else {
                    self.split_list(or_else, out, ctx)?
                };
                Ok(vec![Stmt::If { test, body: body2, or_else: or_else2 }])
            }
            Stmt::Case { subject, arms, or_else } => {
                let mut arms2 = Vec::with_capacity(arms.len());
                for arm in arms {
                    let body2 = self.split_list(arm.body, out, ctx)?;
                    arms2.push(CaseArm { test: arm.test, bindings: arm.bindings, body: body2 });
                }
                let or_else2 = if or_else.is_empty() {
                    vec![Stmt::GotoState(GotoTarget::State(out.clone()))]
                } else {
                    self.split_list(or_else, out, ctx)?
                };
                Ok(vec![Stmt::Case { subject, arms: arms2, or_else: or_else2 }])
            }
            Stmt::While { test, body } => {
                let begin = self.alloc_state();
                let body2 = self.split_list(body, &begin, ctx)?;
                let wrapped = vec![Stmt::If {
                    test,
                    body: body2,
                    or_else: vec![Stmt::GotoState(GotoTarget::State(out.clone()))],
                }];
                self.emit_state(begin.clone(), wrapped, ctx.handler_or_none());
                Ok(vec![Stmt::GotoState(GotoTarget::State(begin))])
            }
            Stmt::Block { label, body } => {
                if let Some(l) = label {
                    self.labels.insert(l, BreakTarget { out_state: out.clone(), nearest_finally: ctx.nearest_finally.clone() });
                }
                self.split_list(body, out, ctx)
            }
            Stmt::Break { label } => self.split_break(label, ctx),
            Stmt::Try(t) => self.split_try(t, out, ctx),
            Stmt::StmtList(inner) => self.split_list(inner, out, ctx),
            Stmt::GotoState(_) | Stmt::GotoStateDynamic(_) | Stmt::State(_) | Stmt::DispatchState => {
                Err(LowerError::UnsupportedConstruct { what: "introduced node reached the state splitter's input", at: CodeRange::synthetic() })
            }
            // Leaves that never themselves trigger `needs_split` but may be
            // reached via the catch-all fallback in `split_list`/recursion
            // above ("a catch-all visit-all-children fallback is
            // essential").
            other @ (Stmt::ExprStmt(_) | Stmt::Assign { .. } | Stmt::VarSection(_) | Stmt::Raise(_)) => {
                Ok(vec![other, Stmt::GotoState(GotoTarget::State(out.clone()))])
            }
        }
    }

    fn split_break(&mut self, label: Option<BlockLabel>, ctx: &Ctx) -> LowerResult<Vec<Stmt>> {
        let Some(label) = label else {
            return Err(LowerError::UnsupportedConstruct { what: "unlabeled break reached the state splitter", at: CodeRange::synthetic() });
        };
        let Some(target) = self.labels.get(&label).cloned() else {
            return Err(LowerError::internal(format!("break to unregistered block label {label:?}")));
        };
        let at = CodeRange::synthetic();
        let same_finally = match (&target.nearest_finally, &ctx.nearest_finally) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        if same_finally {
            return Ok(vec![Stmt::GotoState(GotoTarget::State(target.out_state))]);
        }
        // Partial unroll ("break to label L"): the break must
        // transit at least one `finally` before reaching L's out-state.
        let mut out = vec![self.env.assign_unroll_finally(true, at)];
        match &target.nearest_finally {
            Some(f) => out.push(self.env.assign_unroll_until_ref(f, at)),
            None => out.push(self.env.assign_unroll_until(UNROLL_UNTIL_BREAK_TO_OUTERMOST, at)),
        }
        out.push(self.env.assign_after_unroll_ref(&target.out_state, at));
        let Some(current_finally) = ctx.nearest_finally.clone() else {
            return Err(LowerError::internal("partial unroll requires an enclosing finally but none is in scope"));
        };
        out.push(Stmt::GotoState(GotoTarget::State(current_finally)));
        Ok(out)
    }

    fn split_try(&mut self, t: TryStmt, out: &StateId, ctx: &Ctx) -> LowerResult<Vec<Stmt>> {
        let try_state = self.alloc_state();
        let finally_state = self.alloc_state();
        let except_state = if t.handlers.is_empty() { None } else { Some(self.alloc_state()) };

        let try_entry = try_state.clone();
        let try_handler = match &except_state {
            Some(es) => ExcHandler::Except(es.clone()),
            None => ExcHandler::Finally(finally_state.clone()),
        };

        let body_ctx = Ctx { nearest_finally: Some(finally_state.clone()), handler: Some(try_handler.clone()) };
        let body_out = if t.or_else.is_empty() { finally_state.clone() } else { self.alloc_state() };
        let body_content = self.split_list(t.body, &body_out, &body_ctx)?;
        self.emit_state(try_state, body_content, try_handler);

        if !t.or_else.is_empty() {
            // The `else` clause runs only once the try body completes
            // without an exception; exceptions it raises are not caught by
            // this try's own handlers, so it inherits the outer context.
            let or_else_content = self.split_list(t.or_else, &finally_state, ctx)?;
            self.emit_state(body_out, or_else_content, ctx.handler_or_none());
        }

        if let Some(es) = except_state {
            let except_ctx = Ctx { nearest_finally: Some(finally_state.clone()), handler: Some(ExcHandler::Finally(finally_state.clone())) };
            let except_content = self.collect_except_state(t.handlers, &finally_state, &except_ctx)?;
            self.emit_state(es, except_content, ExcHandler::Finally(finally_state.clone()));
        }

        let mut finally_body = t.finally;
        finally_body.extend(self.end_of_finally_sequence(&finally_state, &ctx.nearest_finally));
        let finally_content = self.split_list(finally_body, out, ctx)?;
        self.emit_state(finally_state.clone(), finally_content, ctx.handler_or_none());

        Ok(vec![Stmt::GotoState(GotoTarget::State(try_entry))])
    }

    /// `collectExceptState`: an if-cascade testing
    /// `getCurrentException() of T_i` per typed handler, preceded by
    /// `curExc := nil`. Falls back to `addElseToExcept` (component C) unless
    /// one handler is a bare `except:` that already catches everything.
    fn collect_except_state(&mut self, handlers: Vec<ExceptHandler>, nearest_finally: &StateId, ctx: &Ctx) -> LowerResult<Vec<Stmt>> {
        let at = CodeRange::synthetic();
        let has_bare = handlers.iter().any(|h| h.exc_type.is_none());
        let mut cascade: Option<Vec<Stmt>> = if has_bare { None } else { Some(crate::try_pre::add_else_to_except(self.env, nearest_finally, at)) };
        for h in handlers.into_iter().rev() {
            let mut body = Vec::new();
            if let Some(bound) = h.bound_name {
                body.push(Stmt::Assign { target: AssignTarget::Name(bound), value: self.env.call_get_current_exception(at) });
            }
            body.extend(self.split_list(h.body, nearest_finally, ctx)?);
            cascade = Some(match h.exc_type {
                None => body,
                Some(ty) => {
                    let test = is_instance_test(self.env.call_get_current_exception(at), ty, at);
                    vec![Stmt::If { test, body, or_else: cascade.unwrap_or_default() }]
                }
            });
        }
        let mut out = vec![self.env.nullify_cur_exc(at)];
        out.extend(cascade.unwrap_or_default());
        Ok(out)
    }

    /// Appends the "end-of-finally" sequence to a `finally`
    /// body. `outer_nearest_finally` is the `finally` that enclosed *this*
    /// try before it was entered — when a pending return/exception hasn't
    /// finished unrolling at this level, control continues there instead of
    /// literally returning/raising immediately, so that unrolling visits
    /// every nested `finally` in turn rather than only the innermost one
    /// (see `DESIGN.md`: the literal pseudocode this follows only shows a
    /// single level of nesting explicitly).
    ///
    /// Two entirely different situations reach this same finally state with
    /// `unrollFinally` false: the try/else body ran to completion (`curExc`
    /// still nil), or the runtime's exception table dispatched here after an
    /// uncaught exception set `curExc` — neither of those is a
    /// code-level unroll, so `unrollFinally` is left untouched on that side,
    /// and an in-flight exception there simply keeps propagating outward.
    /// Only the `unrollFinally` branch represents an explicit `return`/
    /// `break`/re-raise in progress, and only once it
    /// reaches its destination (matching `unrollUntil`, or no further outer
    /// `finally` to visit) does it get to consume the flag.
    fn end_of_finally_sequence(&mut self, this_finally: &StateId, outer_nearest_finally: &Option<StateId>) -> Vec<Stmt> {
        let at = CodeRange::synthetic();

        let unroll_until_matches = Env::<H>::eq_expr(
            self.env.unroll_until_access(at),
            ExprLoc::new(at, Expr::StateRef(this_finally.clone())),
            at,
        );
        let reached_target = vec![
            self.env.assign_unroll_finally(false, at),
            self.env.assign_unroll_until(-1, at),
            Stmt::GotoStateDynamic(self.env.after_unroll_access(at)),
        ];

        // This level's `finally` didn't match `unrollUntil` — the unroll
        // keeps going. With an outer `finally` still ahead, every unroll kind
        // (break/return/re-raise) behaves identically: keep `unrollFinally`
        // set and hand off to it, which will run this same check again.
        // Only once no outer `finally` remains does the kind matter: a
        // break with no finally-bearing target jumps straight to
        // `afterUnroll`, a return produces the final `return`, anything else
        // re-raises `curExc`.
        let still_unrolling = match outer_nearest_finally {
            Some(f) => vec![Stmt::GotoState(GotoTarget::State(f.clone()))],
            None => {
                let is_break_to_outermost = Env::<H>::eq_expr(
                    self.env.unroll_until_access(at),
                    ExprLoc::new(at, Expr::Literal(Literal::Int(UNROLL_UNTIL_BREAK_TO_OUTERMOST))),
                    at,
                );
                let on_break = vec![self.env.assign_unroll_finally(false, at), Stmt::GotoStateDynamic(self.env.after_unroll_access(at))];

                let cur_exc_nil = Env::<H>::eq_expr(self.env.cur_exc_access(at), ExprLoc::new(at, Expr::Literal(Literal::Unit)), at);
                let on_return = {
                    let mut s = vec![self.env.assign_unroll_finally(false, at)];
                    if self.env_has_return_type() {
                        let tmp = self.env.tmp_result_access(at).expect("tmpResult exists when has_return_type is true");
                        s.push(Stmt::Return(Some(tmp)));
                    } else {
                        s.push(Stmt::Return(None));
                    }
                    s
                };
                let on_raise = {
                    let cur_exc = self.env.cur_exc_access(at);
                    vec![self.env.assign_unroll_finally(false, at), self.env.call_closure_iter_setup_exc(None, at), Stmt::Raise(Some(cur_exc))]
                };

                vec![Stmt::If {
                    test: is_break_to_outermost,
                    body: on_break,
                    or_else: vec![Stmt::If { test: cur_exc_nil, body: on_return, or_else: on_raise }],
                }]
            }
        };

        let unrolling_branch = Stmt::If { test: unroll_until_matches, body: reached_target, or_else: still_unrolling };

        let propagating_raise = match outer_nearest_finally {
            Some(f) => vec![Stmt::GotoState(GotoTarget::State(f.clone()))],
            None => {
                let cur_exc = self.env.cur_exc_access(at);
                vec![Stmt::Raise(Some(cur_exc))]
            }
        };
        // `body` is deliberately empty: a normal completion falls through to
        // whatever `split_list` appends after this whole sequence, which is
        // `goto_state(out)` (the default statement-list tail).
        let cur_exc_nil_normally = Env::<H>::eq_expr(self.env.cur_exc_access(at), ExprLoc::new(at, Expr::Literal(Literal::Unit)), at);
        let normal_branch = Stmt::If { test: cur_exc_nil_normally, body: vec![], or_else: propagating_raise };

        vec![Stmt::If { test: self.env.unroll_finally_access(at), body: vec![unrolling_branch], or_else: vec![normal_branch] }]
    }

    fn env_has_return_type(&self) -> bool {
        self.env.host_has_return_type()
    }
}

/// Entry point: splits `body` into the full list of [`StateRecord`]s. The
/// first element is always the entry state; exit (`-1`) is never
/// itself stored.
pub fn split_states<H: CompilerHost, Tr: LowerTracer>(env: &mut Env<'_, H>, tracer: &mut Tr, body: Vec<Stmt>) -> LowerResult<Vec<StateRecord>> {
    let mut splitter = Splitter::new(env, tracer);
    let entry = splitter.alloc_state();
    let content = splitter.split_list(body, &StateId::exit(), &Ctx::default())?;
    splitter.emit_state(entry.clone(), content, ExcHandler::None);

    let mut states = splitter.states;
    // `emit_state` appends in completion order, which for nested control
    // flow (while/try create their inner states before the entry's own call
    // returns) is not necessarily entry-first. The entry must occupy index 0
    // so the lifted `state` field's implicit initial value of 0 is correct.
    let entry_pos = states.iter().position(|s| s.id == entry).expect("entry state was just emitted");
    states.swap(0, entry_pos);
    Ok(states)
}
