//! Component A — environment & accessor factory.
//!
//! Allocates the hidden locals (`state`, `tmpResult`, `unrollFinally`,
//! `unrollUntil`, `afterUnroll`, `curExc`) either inside the lifted
//! environment record or as locals, and builds the AST nodes that read and
//! write them. Every other component goes through this, never through the
//! host directly, so there is exactly one place that knows whether
//! lambda-lifting has run.

use std::collections::HashMap;

use crate::ast::{AssignTarget, BinOp, CodeRange, Expr, ExprLoc, Ident, Literal, Stmt, Symbol, TypeRef, VarBinding};
use crate::error::{LowerError, LowerResult};
use crate::host::CompilerHost;

/// The six hidden variables Component A owns. Named the way `intern.rs`
/// names its own fixed string table: a plain enum with a `strum`-derived
/// string conversion rather than a hand-written match arm per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr)]
enum HiddenVar {
    #[strum(serialize = "state")]
    State,
    #[strum(serialize = "tmpResult")]
    TmpResult,
    #[strum(serialize = "unrollFinally")]
    UnrollFinally,
    #[strum(serialize = "unrollUntil")]
    UnrollUntil,
    #[strum(serialize = "afterUnroll")]
    AfterUnroll,
    #[strum(serialize = "curExc")]
    CurExc,
}

impl HiddenVar {
    fn hint(self) -> &'static str {
        self.into()
    }
}

/// Either an env-record field or a bare local — same accessor surface
/// regardless of which one backs it.
#[derive(Debug, Clone)]
enum Slot {
    Field { env: Symbol, field: Symbol },
    Local(Symbol),
}

impl Slot {
    fn read(&self, at: CodeRange) -> ExprLoc {
        match self {
            Self::Field { env, field } => ExprLoc::new(
                at,
                Expr::AttrAccess {
                    object: Box::new(ExprLoc::new(at, Expr::Name(Ident::new(env.clone(), at)))),
                    attr: field.clone(),
                },
            ),
            Self::Local(name) => ExprLoc::new(at, Expr::Name(Ident::new(name.clone(), at))),
        }
    }

    fn assign(&self, value: ExprLoc, at: CodeRange) -> Stmt {
        match self {
            Self::Field { env, field } => Stmt::Assign {
                target: AssignTarget::Attr {
                    object: Box::new(ExprLoc::new(at, Expr::Name(Ident::new(env.clone(), at)))),
                    attr: field.clone(),
                },
                value,
            },
            Self::Local(name) => Stmt::Assign {
                target: AssignTarget::Name(Ident::new(name.clone(), at)),
                value,
            },
        }
    }
}

/// The accessor factory. Created once per iterator being lowered, threaded
/// through every other component.
pub struct Env<'h, H: CompilerHost> {
    host: &'h mut H,
    env: Option<Symbol>,
    slots: HashMap<HiddenVar, Slot>,
    /// Hidden/temporary locals collected so far, in allocation order — used
    /// to synthesize the `var` section when there is no environment record.
    local_section: Vec<VarBinding>,
}

impl<'h, H: CompilerHost> Env<'h, H> {
    pub fn new(host: &'h mut H) -> Self {
        let env = host.get_env_param();
        Self {
            host,
            env,
            slots: HashMap::new(),
            local_section: Vec::new(),
        }
    }

    pub fn has_env(&self) -> bool {
        self.env.is_some()
    }

    fn slot(&mut self, var: HiddenVar, ty: TypeRef) -> Slot {
        if let Some(slot) = self.slots.get(&var) {
            return slot.clone();
        }
        let slot = self.alloc(var.hint(), ty);
        self.slots.insert(var, slot.clone());
        slot
    }

    fn alloc(&mut self, hint: &str, ty: TypeRef) -> Slot {
        if let Some(env) = self.env.clone() {
            // `state` is special-cased: it must land on the *known* state
            // field so a later lambda-lifting pass (or one that already ran)
            // places it first.
            let field = if hint == "state" {
                self.host.get_state_field(&env)
            } else {
                self.host.add_unique_field(&env, hint, &ty)
            };
            Slot::Field { env, field }
        } else {
            let local = self.host.add_local(hint, &ty);
            self.local_section.push(VarBinding {
                name: Ident::new(local.clone(), CodeRange::synthetic()),
                ty,
                init: None,
            });
            Slot::Local(local)
        }
    }

    /// A brand-new temporary of type `ty`, for Component B's hoisted
    /// sub-expression results. Always goes
    /// through the same env/local decision as the hidden variables.
    pub fn new_temp_var(&mut self, ty: TypeRef, hint: &str) -> Symbol {
        match self.alloc(hint, ty) {
            Slot::Field { field, .. } => field,
            Slot::Local(name) => name,
        }
    }

    /// Same as [`Self::new_temp_var`] but returns a ready-to-use read
    /// expression for the slot, which is what most call sites want.
    pub fn new_temp_var_expr(&mut self, ty: TypeRef, hint: &str, at: CodeRange) -> (Symbol, ExprLoc) {
        let name = self.new_temp_var(ty, hint);
        let expr = ExprLoc::new(at, Expr::Name(Ident::new(name.clone(), at)));
        (name, expr)
    }

    pub fn assign_temp(&self, name: &Symbol, value: ExprLoc, at: CodeRange) -> Stmt {
        Stmt::Assign {
            target: AssignTarget::Name(Ident::new(name.clone(), at)),
            value,
        }
    }

    fn int_type(&mut self) -> TypeRef {
        self.host.create_closure_iter_state_type()
    }

    /// Whether the iterator being lowered has a non-unit return type, i.e.
    /// whether [`Self::tmp_result_access`] is available at all. Exposed so
    /// [`crate::split`] can pick between `return value` and `return` when
    /// synthesizing the end-of-finally sequence's final return.
    pub fn host_has_return_type(&self) -> bool {
        self.host.has_return_type()
    }

    pub fn state_access(&mut self, at: CodeRange) -> ExprLoc {
        let ty = self.int_type();
        self.slot(HiddenVar::State, ty).read(at)
    }

    pub fn assign_state_int(&mut self, value: i64, at: CodeRange) -> Stmt {
        let ty = self.int_type();
        let slot = self.slot(HiddenVar::State, ty);
        slot.assign(ExprLoc::new(at, Expr::Literal(Literal::Int(value))), at)
    }

    pub fn assign_state_expr(&mut self, value: ExprLoc, at: CodeRange) -> Stmt {
        let ty = self.int_type();
        let slot = self.slot(HiddenVar::State, ty);
        slot.assign(value, at)
    }

    /// `tmpResult` is only created when the iterator has a non-unit return
    /// type. Callers that reach here without one have an
    /// internal-error bug in the pass, so this surfaces as `LowerError`.
    fn tmp_result_slot(&mut self, at: CodeRange) -> LowerResult<Slot> {
        if !self.host.has_return_type() {
            return Err(LowerError::MissingReturnType { at });
        }
        let ty = self.host.return_type();
        Ok(self.slot(HiddenVar::TmpResult, ty))
    }

    pub fn tmp_result_access(&mut self, at: CodeRange) -> LowerResult<ExprLoc> {
        Ok(self.tmp_result_slot(at)?.read(at))
    }

    pub fn assign_tmp_result(&mut self, value: ExprLoc, at: CodeRange) -> LowerResult<Stmt> {
        Ok(self.tmp_result_slot(at)?.assign(value, at))
    }

    pub fn unroll_finally_access(&mut self, at: CodeRange) -> ExprLoc {
        self.slot(HiddenVar::UnrollFinally, TypeRef("bool".to_owned())).read(at)
    }

    pub fn assign_unroll_finally(&mut self, value: bool, at: CodeRange) -> Stmt {
        let slot = self.slot(HiddenVar::UnrollFinally, TypeRef("bool".to_owned()));
        slot.assign(ExprLoc::new(at, Expr::Literal(Literal::Bool(value))), at)
    }

    /// Same as [`Self::assign_unroll_finally`], but the value is computed at
    /// runtime (the catch-all wrapper's `unrollFinally := 0 < state`) rather
    /// than a compile-time constant.
    pub fn assign_unroll_finally_expr(&mut self, value: ExprLoc, at: CodeRange) -> Stmt {
        let slot = self.slot(HiddenVar::UnrollFinally, TypeRef("bool".to_owned()));
        slot.assign(value, at)
    }

    pub fn unroll_until_access(&mut self, at: CodeRange) -> ExprLoc {
        let ty = self.int_type();
        self.slot(HiddenVar::UnrollUntil, ty).read(at)
    }

    pub fn assign_unroll_until(&mut self, value: i64, at: CodeRange) -> Stmt {
        let ty = self.int_type();
        let slot = self.slot(HiddenVar::UnrollUntil, ty);
        slot.assign(ExprLoc::new(at, Expr::Literal(Literal::Int(value))), at)
    }

    pub fn after_unroll_access(&mut self, at: CodeRange) -> ExprLoc {
        let ty = self.int_type();
        self.slot(HiddenVar::AfterUnroll, ty).read(at)
    }

    pub fn assign_after_unroll(&mut self, value: i64, at: CodeRange) -> Stmt {
        let ty = self.int_type();
        let slot = self.slot(HiddenVar::AfterUnroll, ty);
        slot.assign(ExprLoc::new(at, Expr::Literal(Literal::Int(value))), at)
    }

    /// Same as [`Self::assign_after_unroll`], but the target state's id isn't
    /// final yet. Carries a [`crate::ast::StateId`] reference instead of a
    /// literal so state-assignment lowering can resolve it once folding has
    /// renumbered everything.
    pub fn assign_after_unroll_ref(&mut self, state: &crate::ast::StateId, at: CodeRange) -> Stmt {
        let ty = self.int_type();
        let slot = self.slot(HiddenVar::AfterUnroll, ty);
        slot.assign(ExprLoc::new(at, Expr::StateRef(state.clone())), at)
    }

    /// Same as [`Self::assign_unroll_until`], but the target state's id isn't
    /// final yet; see [`Self::assign_after_unroll_ref`].
    pub fn assign_unroll_until_ref(&mut self, state: &crate::ast::StateId, at: CodeRange) -> Stmt {
        let ty = self.int_type();
        let slot = self.slot(HiddenVar::UnrollUntil, ty);
        slot.assign(ExprLoc::new(at, Expr::StateRef(state.clone())), at)
    }

    pub fn cur_exc_access(&mut self, at: CodeRange) -> ExprLoc {
        self.slot(HiddenVar::CurExc, TypeRef("Exception".to_owned())).read(at)
    }

    pub fn assign_cur_exc(&mut self, value: ExprLoc, at: CodeRange) -> Stmt {
        let slot = self.slot(HiddenVar::CurExc, TypeRef("Exception".to_owned()));
        slot.assign(value, at)
    }

    pub fn nullify_cur_exc(&mut self, at: CodeRange) -> Stmt {
        let slot = self.slot(HiddenVar::CurExc, TypeRef("Exception".to_owned()));
        slot.assign(ExprLoc::new(at, Expr::Literal(Literal::Unit)), at)
    }

    /// Tests `lhs == 0` / boolean truthiness, used when lowering short
    /// circuit `and`/`or` and `if unrollFinally:` checks to an explicit
    /// `if`/comparison form.
    pub fn eq_expr(lhs: ExprLoc, rhs: ExprLoc, at: CodeRange) -> ExprLoc {
        ExprLoc::new(
            at,
            Expr::BinOp {
                op: BinOp::Eq,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    /// Reads the symbol the host told us holds the yielded/resumed value
    /// used to materialize the value of
    /// an `Expr::Yield` once control resumes.
    pub fn closure_iter_result_expr(&mut self, at: CodeRange) -> ExprLoc {
        let sym = self.host.get_closure_iter_result();
        ExprLoc::new(at, Expr::Name(Ident::new(sym, at)))
    }

    /// Deposits `value` into the same symbol [`Self::closure_iter_result_expr`]
    /// reads: the channel `state := k ; return` uses to hand a yielded value
    /// back to the caller, since the generated function's own return carries
    /// no payload of its own.
    pub fn assign_closure_iter_result(&mut self, value: ExprLoc, at: CodeRange) -> Stmt {
        let sym = self.host.get_closure_iter_result();
        Stmt::Assign { target: AssignTarget::Name(Ident::new(sym, at)), value }
    }

    pub fn fresh_id(&mut self) -> u32 {
        self.host.fresh_id()
    }

    pub fn call_get_current_exception(&mut self, at: CodeRange) -> ExprLoc {
        self.host.call_get_current_exception(at)
    }

    pub fn call_closure_iter_setup_exc(&mut self, arg: Option<ExprLoc>, at: CodeRange) -> Stmt {
        self.host.call_closure_iter_setup_exc(arg, at)
    }

    /// The synthesized `var` section to prepend when no environment record
    /// exists, containing every hidden var and temporary allocated so far.
    /// Returns `None` in lambda-lifted mode (everything already lives on the
    /// env record) or when nothing was ever allocated.
    pub fn take_local_section(&mut self) -> Option<Stmt> {
        if self.local_section.is_empty() {
            None
        } else {
            Some(Stmt::VarSection(std::mem::take(&mut self.local_section)))
        }
    }
}
