//! Pipeline stages and the contract they share.

pub mod cooking_optimization;
pub mod image_generation;
pub mod ingredient_priority;
pub mod meal_theme;
pub mod model_call;
pub mod nutrition_balance;
pub mod recipe_suggestion;
pub mod user_preference;

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::{StageError, StageKind, ValidationError};

/// One unit of the pipeline with a fixed request/result contract.
///
/// Implementors supply `execute`; `process` runs the lifecycle
/// validate -> preprocess -> execute -> postprocess and turns every failure
/// into a [`StageError`] tagged with the stage kind.
#[async_trait]
pub trait Stage: Debug + Send + Sync {
    type Request: Debug + Send + Sync + 'static;
    type Output: Send + 'static;

    fn kind(&self) -> StageKind;

    fn validate(&self, _request: &Self::Request) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn preprocess(&self, request: Self::Request) -> anyhow::Result<Self::Request> {
        Ok(request)
    }

    async fn execute(&self, request: &Self::Request) -> anyhow::Result<Self::Output>;

    async fn postprocess(&self, output: Self::Output) -> anyhow::Result<Self::Output> {
        Ok(output)
    }

    async fn process(&self, request: Self::Request) -> Result<Self::Output, StageError> {
        let kind = self.kind();
        let request_shape = std::any::type_name::<Self::Request>();

        if let Err(err) = self.validate(&request) {
            warn!(stage = %kind, request = request_shape, error = %err, "Stage request rejected");
            return Err(StageError::new(kind, err));
        }

        let outcome: anyhow::Result<Self::Output> = async {
            let request = self.preprocess(request).await?;
            let output = self.execute(&request).await?;
            self.postprocess(output).await
        }
        .await;

        outcome.map_err(|err| {
            error!(stage = %kind, request = request_shape, error = %format!("{:#}", err), "Stage failed");
            StageError::new(kind, err)
        })
    }
}

/// A stage behind a trait object, so the planner can run any implementation.
pub type SharedStage<Req, Out> = Arc<dyn Stage<Request = Req, Output = Out>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageFailure;
    use anyhow::anyhow;

    #[derive(Debug)]
    struct Doubler;

    #[async_trait]
    impl Stage for Doubler {
        type Request = i64;
        type Output = i64;

        fn kind(&self) -> StageKind {
            StageKind::NutritionBalance
        }

        fn validate(&self, request: &i64) -> Result<(), ValidationError> {
            if *request < 0 {
                return Err(ValidationError::EmptyIngredients);
            }
            Ok(())
        }

        async fn preprocess(&self, request: i64) -> anyhow::Result<i64> {
            Ok(request + 1)
        }

        async fn execute(&self, request: &i64) -> anyhow::Result<i64> {
            if *request > 100 {
                return Err(anyhow!("too large"));
            }
            Ok(request * 2)
        }
    }

    #[tokio::test]
    async fn test_lifecycle_runs_in_order() {
        assert_eq!(Doubler.process(4).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_validation_failure_is_wrapped() {
        let err = Doubler.process(-1).await.unwrap_err();
        assert_eq!(err.kind, StageKind::NutritionBalance);
        assert!(matches!(err.failure, StageFailure::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_execute_failure_is_wrapped() {
        let err = Doubler.process(500).await.unwrap_err();
        assert!(matches!(err.failure, StageFailure::Internal(_)));
        assert!(err.to_string().contains("nutrition_balance"));
    }
}
