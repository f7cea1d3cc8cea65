use anyhow::Context;
use arg::{Arg, Args, ArgType, NamedArg};
use arrow::array::RecordBatch;
use derive_builder::Builder;
use serde::Serialize;
use std::sync::Arc;

pub mod arg;

/// Instantiates the function behind `registry`.
///
/// `parameters` is a JSON array of positional [`Arg`]s and `named_parameters`
/// a JSON array of [`NamedArg`]s; either may be absent.
pub fn create(
    registry: &FunctionRegistry,
    parameters: Option<&str>,
    named_parameters: Option<&str>,
) -> anyhow::Result<Box<dyn TableFunction>> {
    let create_closure = &(registry.init);
    let parameters = if let Some(param) = parameters {
        Some(serde_json::from_str::<Args>(param).context("serde json failed")?)
    } else {
        None
    };
    let named_arguments = if let Some(param) = named_parameters {
        serde_json::from_str::<Vec<NamedArg>>(param)
            .context("serde json failed for named parameters")?
            .into_iter()
            .map(Into::into)
            .collect()
    } else {
        Vec::new()
    };
    let ctx = FunctionContext {
        parameters,
        named_arguments,
    };
    create_closure(ctx)
}

type TableFunctionInitialize =
    Arc<dyn Fn(FunctionContext) -> anyhow::Result<Box<dyn TableFunction>>>;

#[derive(Builder)]
pub struct FunctionRegistry {
    #[builder(setter(into))]
    name: &'static str,
    init: TableFunctionInitialize,
    #[builder(setter(strip_option, each(name = "signature", into)))]
    signatures: Option<Vec<Signature>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("name", &self.name)
            .field("init", &Arc::as_ptr(&self.init))
            .field("signatures", &self.signatures)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn signatures(&self) -> anyhow::Result<String> {
        serde_json::to_string(&self.signatures).context("Failed to get signatures")
    }

    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::default()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Signature {
    pub args: Vec<ArgType>,
}

impl Signature {
    pub fn empty() -> Self {
        Signature { args: Vec::new() }
    }
}

impl From<Vec<ArgType>> for Signature {
    fn from(value: Vec<ArgType>) -> Self {
        Signature { args: value }
    }
}

pub struct FunctionContext {
    pub parameters: Option<Args>,
    pub named_arguments: Vec<(String, Arg)>,
}

pub trait TableFunction {
    fn process(&mut self, input: RecordBatch) -> anyhow::Result<Option<RecordBatch>>;

    fn finalize(&mut self) -> anyhow::Result<Option<RecordBatch>> {
        Ok(None)
    }
}
