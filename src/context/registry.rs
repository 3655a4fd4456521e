//! Name-to-constructor table for solver methods.

use std::collections::BTreeMap;

use crate::error::GtError;
use crate::solver::{GradientDescent, NewtonLineSearch, SolverMethod};

pub type MethodFactory = fn() -> Box<dyn SolverMethod>;

/// Methods an application can select by name, e.g. through `-tao_type`.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    factories: BTreeMap<String, MethodFactory>,
}

impl MethodRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in methods `"gd"` and `"nls"`.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register("gd", create_gd);
        reg.register("nls", create_nls);
        reg
    }

    /// Add or replace a method.
    pub fn register(&mut self, name: &str, factory: MethodFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn SolverMethod>, GtError> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| GtError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

fn create_gd() -> Box<dyn SolverMethod> {
    Box::new(GradientDescent::new())
}

fn create_nls() -> Box<dyn SolverMethod> {
    Box::new(NewtonLineSearch::new())
}
