//! Cache Key Module
//!
//! Builds cache keys from invocation arguments.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

/// Transforms a single argument before it becomes part of a key.
pub type ParamMapper = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Builds the key for a list of arguments: their JSON array text.
pub fn generate_key(args: &[Value]) -> String {
    Value::Array(args.to_vec()).to_string()
}

// == Cache Param ==
/// Selects how one argument takes part in key generation.
#[derive(Clone)]
pub struct CacheParam {
    pub index: usize,
    pub ignore: bool,
    pub mapper: Option<ParamMapper>,
}

impl fmt::Debug for CacheParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheParam")
            .field("index", &self.index)
            .field("ignore", &self.ignore)
            .field("mapper", &self.mapper.is_some())
            .finish()
    }
}

impl CacheParam {
    /// Includes the argument at `index`.
    pub fn include(index: usize) -> Self {
        Self {
            index,
            ignore: false,
            mapper: None,
        }
    }

    /// Leaves the argument at `index` out of the key.
    pub fn ignore(index: usize) -> Self {
        Self {
            index,
            ignore: true,
            mapper: None,
        }
    }

    /// Includes the argument at `index` after passing it through `mapper`.
    pub fn mapped<F>(index: usize, mapper: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            index,
            ignore: false,
            mapper: Some(Arc::new(mapper)),
        }
    }
}

// == Resolve Params ==
/// Selects the arguments that make up a key.
///
/// Included params take precedence: when at least one param is included, the
/// result holds exactly the included arguments in param order, and an index
/// past the end resolves to `null`. Otherwise every argument not ignored is
/// returned in its original order.
pub fn resolve_params(args: &[Value], params: &[CacheParam]) -> Vec<Value> {
    let included: Vec<&CacheParam> = params.iter().filter(|param| !param.ignore).collect();

    if !included.is_empty() {
        return included
            .into_iter()
            .map(|param| match args.get(param.index) {
                Some(value) => match &param.mapper {
                    Some(mapper) => mapper(value),
                    None => value.clone(),
                },
                None => {
                    warn!(
                        index = param.index,
                        args = args.len(),
                        "Cache parameter index is out of range"
                    );
                    Value::Null
                }
            })
            .collect();
    }

    args.iter()
        .enumerate()
        .filter(|(index, _)| !params.iter().any(|param| param.index == *index))
        .map(|(_, value)| value.clone())
        .collect()
}
