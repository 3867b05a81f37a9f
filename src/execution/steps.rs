//! The step catalogue and the steps that do not submit transactions.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use super::context::ExecutionContext;
use super::fields::FieldReader;
use super::registry::StepsKind;
use super::scene;
use super::transaction::{
    save_results, ContractCallStep, ContractDeployStep, ContractUpgradeStep, FungibleMintStep, ManageTokenRolesStep,
    NonFungibleMintStep, TokenIssueStep, TransferStep,
};
use crate::error::{OpsResult, ResolutionError, StepError};
use crate::scenario::TokenKind;
use crate::smart_value::{
    AddressKind, BoolKind, FloatKind, IntKind, ListKind, MapKind, PathKind, ResultsSaveKeysKind, SmartValue,
    StrKind,
};
use crate::value::Value;

/// A unit of work within a scene.
#[derive(Debug, Clone)]
pub enum Step {
    ContractDeploy(ContractDeployStep),
    ContractUpgrade(ContractUpgradeStep),
    ContractCall(ContractCallStep),
    ContractQuery(ContractQueryStep),
    Transfer(TransferStep),
    TokenIssue(TokenIssueStep),
    FungibleMint(FungibleMintStep),
    ManageTokenRoles(ManageTokenRolesStep),
    NonFungibleMint(NonFungibleMintStep),
    Loop(LoopStep),
    Scene(SceneStep),
    SetVars(SetVarsStep),
    Wait(WaitStep),
    Log(LogStep),
    Assert(AssertStep),
    SetSeed(SetSeedStep),
}

impl Step {
    /// Registry tag of the step.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::ContractDeploy(_) => "ContractDeploy",
            Self::ContractUpgrade(_) => "ContractUpgrade",
            Self::ContractCall(_) => "ContractCall",
            Self::ContractQuery(_) => "ContractQuery",
            Self::Transfer(_) => "Transfer",
            Self::TokenIssue(step) => match step.kind() {
                TokenKind::Fungible => "FungibleIssue",
                TokenKind::SemiFungible => "SemiFungibleIssue",
                TokenKind::NonFungible => "NonFungibleIssue",
                TokenKind::Meta => "MetaIssue",
            },
            Self::FungibleMint(_) => "FungibleMint",
            Self::ManageTokenRoles(step) => match step.kind() {
                TokenKind::Fungible => "ManageFungibleTokenRoles",
                TokenKind::SemiFungible => "ManageSemiFungibleTokenRoles",
                TokenKind::NonFungible => "ManageNonFungibleTokenRoles",
                TokenKind::Meta => "ManageMetaTokenRoles",
            },
            Self::NonFungibleMint(step) => match step.kind() {
                TokenKind::SemiFungible => "SemiFungibleMint",
                TokenKind::Meta => "MetaMint",
                TokenKind::NonFungible | TokenKind::Fungible => "NonFungibleMint",
            },
            Self::Loop(_) => "Loop",
            Self::Scene(_) => "Scene",
            Self::SetVars(_) => "SetVars",
            Self::Wait(_) => "Wait",
            Self::Log(_) => "Log",
            Self::Assert(_) => "Assert",
            Self::SetSeed(_) => "SetSeed",
        }
    }

    /// Steps that only sequence other steps; their children persist the
    /// scenario themselves.
    #[must_use]
    pub const fn is_meta(&self) -> bool {
        matches!(self, Self::Loop(_) | Self::Scene(_))
    }

    /// Resolves the fields of the step and applies its effect.
    ///
    /// # Errors
    ///
    /// Propagates whatever the step raises; nothing is retried.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        match self {
            Self::ContractDeploy(step) => step.execute(ctx),
            Self::ContractUpgrade(step) => step.execute(ctx),
            Self::ContractCall(step) => step.execute(ctx),
            Self::ContractQuery(step) => step.execute(ctx),
            Self::Transfer(step) => step.execute(ctx),
            Self::TokenIssue(step) => step.execute(ctx),
            Self::FungibleMint(step) => step.execute(ctx),
            Self::ManageTokenRoles(step) => step.execute(ctx),
            Self::NonFungibleMint(step) => step.execute(ctx),
            Self::Loop(step) => step.execute(ctx),
            Self::Scene(step) => step.execute(ctx),
            Self::SetVars(step) => step.execute(ctx),
            Self::Wait(step) => step.execute(ctx),
            Self::Log(step) => step.execute(ctx),
            Self::Assert(step) => step.execute(ctx),
            Self::SetSeed(step) => step.execute(ctx),
        }
    }
}

/// Executes one step and persists the scenario after effect-bearing steps.
pub(crate) fn run_step(step: &mut Step, ctx: &mut ExecutionContext) -> OpsResult<()> {
    debug!("executing {}", step.type_name());
    step.execute(ctx)?;
    if !step.is_meta() {
        ctx.store().save()?;
    }
    Ok(())
}

/// Reads the results of a view endpoint.
#[derive(Debug, Clone)]
pub struct ContractQueryStep {
    contract: SmartValue<AddressKind>,
    endpoint: SmartValue<StrKind>,
    arguments: SmartValue<ListKind>,
    log_results: SmartValue<BoolKind>,
    results_save_keys: Option<SmartValue<ResultsSaveKeysKind>>,
}

impl ContractQueryStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            contract: fields.required("contract")?,
            endpoint: fields.required("endpoint")?,
            arguments: fields.with_default("arguments", Value::List(Vec::new())),
            log_results: fields.with_default("log_results", true),
            results_save_keys: fields.optional("results_save_keys"),
        };
        fields.finish()?;
        Ok(Step::ContractQuery(step))
    }

    /// Runs the query and saves the results if asked to.
    ///
    /// # Errors
    ///
    /// Propagates resolution, gateway and store errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        {
            let resolver = ctx.resolver();
            self.contract.evaluate(&resolver)?;
            self.endpoint.evaluate(&resolver)?;
            self.arguments.evaluate(&resolver)?;
            self.log_results.evaluate(&resolver)?;
            if let Some(keys) = &mut self.results_save_keys {
                keys.evaluate(&resolver)?;
            }
        }
        let contract = *self.contract.get()?;
        let args = self
            .arguments
            .get()?
            .iter()
            .map(super::transaction::encode_argument)
            .collect::<OpsResult<Vec<_>>>()?;
        info!(
            "querying {} on {}",
            self.endpoint.get()?,
            self.contract.evaluation_string()?
        );
        let results = ctx.gateway().query_state(&contract, self.endpoint.get()?, &args)?;
        let keys = self.results_save_keys.as_ref().map(SmartValue::get).transpose()?;
        save_results(ctx, contract, keys, &results, *self.log_results.get()?)
    }
}

/// Repeats a list of steps over a range or a list of values.
#[derive(Debug, Clone)]
pub struct LoopStep {
    steps: SmartValue<StepsKind>,
    var_name: SmartValue<StrKind>,
    var_start: Option<SmartValue<IntKind>>,
    var_end: Option<SmartValue<IntKind>>,
    var_list: Option<SmartValue<ListKind>>,
}

impl LoopStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            steps: fields.required("steps")?,
            var_name: fields.required("var_name")?,
            var_start: fields.optional("var_start"),
            var_end: fields.optional("var_end"),
            var_list: fields.optional("var_list"),
        };
        let range = step.var_start.is_some() && step.var_end.is_some();
        let partial_range = step.var_start.is_some() != step.var_end.is_some();
        if partial_range || range == step.var_list.is_some() {
            return Err(StepError::invalid(
                fields.tag(),
                "a loop needs either both var_start and var_end, or var_list",
            )
            .into());
        }
        fields.finish()?;
        Ok(Step::Loop(step))
    }

    /// Resolves the iteration values and seeds the loop variable with the
    /// first one, so that the body can reference it before it runs.
    ///
    /// # Errors
    ///
    /// Propagates resolution and store errors.
    pub fn cursor(&mut self, ctx: &mut ExecutionContext) -> OpsResult<LoopCursor> {
        {
            let resolver = ctx.resolver();
            self.var_name.evaluate(&resolver)?;
            for bound in [&mut self.var_start, &mut self.var_end].into_iter().flatten() {
                bound.evaluate(&resolver)?;
            }
            if let Some(list) = &mut self.var_list {
                list.evaluate(&resolver)?;
            }
        }
        let values: Vec<Value> = match (&self.var_start, &self.var_end, &self.var_list) {
            (Some(start), Some(end), _) => (*start.get()?..*end.get()?).map(Value::Int).collect(),
            (_, _, Some(list)) => list.get()?.clone(),
            _ => return Err(StepError::invalid("Loop", "no iteration values").into()),
        };
        let var_name = self.var_name.get()?.clone();
        if let Some(first) = values.first() {
            ctx.store_mut().set_value(&var_name, first.clone())?;
        }
        Ok(LoopCursor {
            var_name,
            values,
            steps: self.steps.clone(),
            next_value: 0,
            pending: VecDeque::new(),
        })
    }

    /// Runs every iteration in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing child step.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        let mut cursor = self.cursor(ctx)?;
        info!("looping over {} value(s) of {}", cursor.iterations(), cursor.var_name);
        while let Some(mut step) = cursor.next_step(ctx)? {
            run_step(&mut step, ctx)?;
        }
        Ok(())
    }
}

/// Lazy sequence of the child steps of a loop.
///
/// Each iteration writes the loop variable, then resolves the body again so
/// that every child sees the current value.
#[derive(Debug, Clone)]
pub struct LoopCursor {
    var_name: String,
    values: Vec<Value>,
    steps: SmartValue<StepsKind>,
    next_value: usize,
    pending: VecDeque<Step>,
}

impl LoopCursor {
    /// Number of iterations.
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.values.len()
    }

    /// Next child step to run, or `None` once every iteration is done.
    ///
    /// # Errors
    ///
    /// Returns store errors and definition errors of the body.
    pub fn next_step(&mut self, ctx: &mut ExecutionContext) -> OpsResult<Option<Step>> {
        loop {
            if let Some(step) = self.pending.pop_front() {
                return Ok(Some(step));
            }
            let Some(value) = self.values.get(self.next_value).cloned() else {
                return Ok(None);
            };
            self.next_value += 1;
            debug!("{} = {}", self.var_name, value.repr());
            ctx.store_mut().set_value(&self.var_name, value)?;
            self.steps.evaluate(&ctx.resolver())?;
            self.pending = self.steps.get()?.iter().cloned().collect();
        }
    }

    /// Starts over from the first iteration.
    pub fn restart(&mut self) {
        self.next_value = 0;
        self.pending.clear();
    }
}

/// Writes values into the scenario.
#[derive(Debug, Clone)]
pub struct SetVarsStep {
    variables: SmartValue<MapKind>,
}

impl SetVarsStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            variables: fields.required("variables")?,
        };
        fields.finish()?;
        Ok(Step::SetVars(step))
    }

    /// Sets every variable, in definition order.
    ///
    /// # Errors
    ///
    /// Propagates resolution and store errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        self.variables.evaluate(&ctx.resolver())?;
        for (key, value) in self.variables.get()?.clone() {
            info!("setting {key} to {}", value.repr());
            ctx.store_mut().set_value(&key, value)?;
        }
        Ok(())
    }
}

/// Pauses the run.
#[derive(Debug, Clone)]
pub struct WaitStep {
    for_seconds: SmartValue<FloatKind>,
}

impl WaitStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            for_seconds: fields.required("for_seconds")?,
        };
        fields.finish()?;
        Ok(Step::Wait(step))
    }

    /// Sleeps for the resolved duration.
    ///
    /// # Errors
    ///
    /// Returns a parsing error for negative or non finite durations.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        self.for_seconds.evaluate(&ctx.resolver())?;
        let seconds = *self.for_seconds.get()?;
        let pause = Duration::try_from_secs_f64(seconds)
            .map_err(|_| ResolutionError::parsing(format!("cannot wait for {seconds} seconds")))?;
        info!("waiting for {}", self.for_seconds.evaluation_string()?);
        thread::sleep(pause);
        Ok(())
    }
}

/// Logs a resolved message.
#[derive(Debug, Clone)]
pub struct LogStep {
    message: SmartValue<StrKind>,
}

impl LogStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            message: fields.required("message")?,
        };
        fields.finish()?;
        Ok(Step::Log(step))
    }

    /// Logs the message at info level.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        self.message.evaluate(&ctx.resolver())?;
        info!("{}", self.message.get()?);
        Ok(())
    }
}

/// Fails the run unless an expression holds.
#[derive(Debug, Clone)]
pub struct AssertStep {
    expression: SmartValue<BoolKind>,
}

impl AssertStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            expression: fields.required("expression")?,
        };
        fields.finish()?;
        Ok(Step::Assert(step))
    }

    /// # Errors
    ///
    /// Returns `AssertionFailed` when the expression resolves to false.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        self.expression.evaluate(&ctx.resolver())?;
        if *self.expression.get()? {
            debug!("assertion {} holds", self.expression.raw().repr());
            return Ok(());
        }
        Err(StepError::AssertionFailed {
            expression: self.expression.raw().repr(),
            value: self.expression.evaluation_string()?,
        }
        .into())
    }
}

/// Reseeds the generator behind `rand`, `randint` and `choice`.
#[derive(Debug, Clone)]
pub struct SetSeedStep {
    seed: SmartValue<IntKind>,
}

impl SetSeedStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            seed: fields.required("seed")?,
        };
        fields.finish()?;
        Ok(Step::SetSeed(step))
    }

    /// # Errors
    ///
    /// Returns a parsing error if the seed does not fit in 64 bits.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        self.seed.evaluate(&ctx.resolver())?;
        let seed = *self.seed.get()?;
        let seed = u64::try_from(seed).map_err(|_| ResolutionError::parsing(format!("invalid seed {seed}")))?;
        info!("reseeding formulas with {seed}");
        ctx.reseed(seed);
        Ok(())
    }
}

/// Runs another scene file, or every scene of a directory.
#[derive(Debug, Clone)]
pub struct SceneStep {
    path: SmartValue<PathKind>,
    repeat: SmartValue<IntKind>,
}

impl SceneStep {
    pub(crate) fn from_fields(mut fields: FieldReader) -> OpsResult<Step> {
        let step = Self {
            path: fields.required("path")?,
            repeat: fields.with_default("repeat", 1),
        };
        fields.finish()?;
        Ok(Step::Scene(step))
    }

    /// # Errors
    ///
    /// Propagates the errors of the nested scenes.
    pub fn execute(&mut self, ctx: &mut ExecutionContext) -> OpsResult<()> {
        {
            let resolver = ctx.resolver();
            self.path.evaluate(&resolver)?;
            self.repeat.evaluate(&resolver)?;
        }
        let path = self.path.get()?.clone();
        let repeat = *self.repeat.get()?;
        for round in 0..repeat {
            debug!("scene {} round {}", path.display(), round + 1);
            scene::execute_path(ctx, &path)?;
        }
        Ok(())
    }
}
