// Control-Flow Evaluator
// Picks the space that follows a completed one, asking for input when a condition needs it

use crate::artifact::{Transition, END};
use crate::error::{EngineError, EngineResult};
use crate::execution::context::RunContext;
use crate::execution::input::InputRequest;
use crate::expression::{Condition, EvalError};

/// Evaluates outgoing transitions of a space
pub struct ControlFlowEvaluator<'a> {
    ctx: &'a RunContext,
}

impl<'a> ControlFlowEvaluator<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Choose the successor of `current` and persist it as the run's
    /// control state. Returns [`END`] when the run is finished.
    pub async fn next_space(&self, current: &str) -> EngineResult<String> {
        let outgoing: Vec<&Transition> = self
            .ctx
            .artifact
            .document
            .control
            .transitions
            .iter()
            .filter(|t| t.from == current)
            .collect();

        let next = self.choose(current, &outgoing).await?;
        tracing::info!(run_id = %self.ctx.run_id, from = %current, to = %next, "transition");

        self.ctx
            .store
            .set_control_state(&self.ctx.run_id, &next)
            .await?;
        Ok(next)
    }

    async fn choose(&self, current: &str, outgoing: &[&Transition]) -> EngineResult<String> {
        match outgoing {
            [] => return Ok(END.to_string()),
            [only] if !only.is_conditional() => return Ok(only.to.clone()),
            _ => {}
        }

        // Declared order; the first unconditioned or true transition wins
        for transition in outgoing {
            let Some(source) = transition.condition.as_deref().filter(|_| transition.is_conditional())
            else {
                return Ok(transition.to.clone());
            };

            if self.evaluate(current, source).await? {
                return Ok(transition.to.clone());
            }
        }

        Err(EngineError::ControlFlow(format!(
            "no transition condition evaluated to true for space '{}'",
            current
        )))
    }

    async fn evaluate(&self, current: &str, source: &str) -> EngineResult<bool> {
        let expression_error = |source_err: EvalError| EngineError::Expression {
            condition: source.to_string(),
            source: source_err,
        };

        let condition = Condition::parse(source).map_err(expression_error)?;

        let input = if condition.uses_input() {
            Some(self.request_input(current, source).await?)
        } else {
            None
        };

        let result = condition
            .evaluate(input.as_deref())
            .map_err(expression_error)?;
        tracing::debug!(condition = %source, ?input, result, "condition evaluated");
        Ok(result)
    }

    /// Ask the input provider once for this condition, bounded by the
    /// configured timeout and by termination of the run, whether signalled
    /// in-process or recorded in the store by another engine
    async fn request_input(&self, current: &str, condition: &str) -> EngineResult<String> {
        let ctx = self.ctx;
        let provider = ctx.input.as_ref().ok_or_else(|| {
            EngineError::Input(format!(
                "condition '{}' needs input but no input provider is configured",
                condition
            ))
        })?;

        let request = InputRequest::new(&ctx.run_id, current, condition);
        provider.announce(&request);
        ctx.notifier.input_required(request.clone());

        let timeout = ctx.config.input_timeout();
        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => Err(EngineError::Terminated(ctx.run_id.clone())),
            err = ctx.until_inactive() => Err(err),
            answer = tokio::time::timeout(timeout, provider.request_input(&request)) => {
                match answer {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Input(format!(
                        "no input received within {:?} for condition '{}'",
                        timeout,
                        condition
                    ))),
                }
            }
        }
    }
}
