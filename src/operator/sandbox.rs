use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use super::api::{Api, ApiBuilder, ApiCall, Arity};
use crate::error::FaultResult;
use crate::value::Value;

/// A named group of host functions exposed to operators as commands.
#[derive(Debug, Clone)]
pub struct SandboxModule {
    name: String,
    api: Api,
}

impl SandboxModule {
    pub fn builder(name: &str) -> SandboxModuleBuilder {
        SandboxModuleBuilder {
            name: name.to_string(),
            api: Api::builder(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api(&self) -> &Api {
        &self.api
    }
}

pub struct SandboxModuleBuilder {
    name: String,
    api: ApiBuilder,
}

impl SandboxModuleBuilder {
    /// Module functions never see the operator instance.
    pub fn function<F, Fut>(mut self, name: &str, arity: Arity, f: F) -> Self
    where
        F: Fn(ApiCall, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FaultResult<Value>> + Send + 'static,
    {
        self.api = self
            .api
            .command(name, arity, move |call, _instance, args| f(call, args));
        self
    }

    pub fn build(self) -> SandboxModule {
        SandboxModule {
            name: self.name,
            api: self.api.build(),
        }
    }
}

/// Registry of sandbox modules, injected into the operator registry.
#[derive(Debug, Default)]
pub struct SandboxModules {
    modules: DashMap<String, Arc<SandboxModule>>,
}

impl SandboxModules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module: SandboxModule) {
        self.modules
            .insert(module.name().to_string(), Arc::new(module));
    }

    pub fn get(&self, name: &str) -> Option<Arc<SandboxModule>> {
        self.modules.get(name).map(|m| m.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|m| m.key().clone()).collect();
        names.sort();
        names
    }
}
