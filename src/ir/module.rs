//! Modules: functions, extern declarations, globals and struct types under one
//! namespace.

use std::sync::Arc;

use super::function::{FunctionData, FunctionPrototype};
use super::types::{StructType, Type};
use super::value::Constant;
use crate::core::{CompileError, CompileResult};

/// Initial contents of a global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
    /// Zero-filled storage of the global's size.
    Zero,
    Scalar(Constant),
    /// Elements laid out back to back.
    Aggregate(Vec<Constant>),
    /// NUL-terminated string.
    String(String),
    /// Defined in another unit.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalValue {
    pub name: Arc<str>,
    pub ty: Type,
    pub init: GlobalInit,
    /// Read-only data.
    pub constant: bool,
}

impl GlobalValue {
    pub fn new(name: &str, ty: Type, init: GlobalInit) -> Self {
        Self { name: Arc::from(name), ty, init, constant: false }
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn is_external(&self) -> bool {
        matches!(self.init, GlobalInit::External)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    functions: Vec<FunctionData>,
    externs: Vec<FunctionPrototype>,
    globals: Vec<GlobalValue>,
    structs: Vec<Arc<StructType>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    fn name_taken(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name() == name)
            || self.externs.iter().any(|e| e.name == name)
            || self.globals.iter().any(|g| &*g.name == name)
    }

    fn claim(&self, name: &str) -> CompileResult<()> {
        if self.name_taken(name) {
            return Err(CompileError::invalid_ir(format!(
                "symbol @{name} is already defined in module {}",
                self.name
            )));
        }
        Ok(())
    }

    pub fn add_function(&mut self, func: FunctionData) -> CompileResult<()> {
        self.claim(func.name())?;
        self.functions.push(func);
        Ok(())
    }

    pub fn add_extern(&mut self, proto: FunctionPrototype) -> CompileResult<()> {
        self.claim(&proto.name)?;
        self.externs.push(proto);
        Ok(())
    }

    pub fn add_global(&mut self, global: GlobalValue) -> CompileResult<()> {
        self.claim(&global.name)?;
        self.globals.push(global);
        Ok(())
    }

    /// Register a struct type and return it as a `Type`.
    pub fn add_struct(&mut self, ty: StructType) -> CompileResult<Type> {
        if self.structs.iter().any(|s| s.name == ty.name) {
            return Err(CompileError::invalid_ir(format!("struct %{} is already defined", ty.name)));
        }
        let ty = Arc::new(ty);
        self.structs.push(ty.clone());
        Ok(Type::Struct(ty))
    }

    pub fn functions(&self) -> &[FunctionData] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [FunctionData] {
        &mut self.functions
    }

    pub fn function(&self, name: &str) -> CompileResult<&FunctionData> {
        self.functions
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| CompileError::FunctionNotFound { name: name.to_string() })
    }

    pub fn externs(&self) -> &[FunctionPrototype] {
        &self.externs
    }

    pub fn globals(&self) -> &[GlobalValue] {
        &self.globals
    }

    pub fn structs(&self) -> &[Arc<StructType>] {
        &self.structs
    }

    /// Prototype of a defined or declared function.
    pub fn prototype(&self, name: &str) -> Option<&FunctionPrototype> {
        self.functions
            .iter()
            .map(FunctionData::prototype)
            .chain(self.externs.iter())
            .find(|p| p.name == name)
    }

    /// Whether `name` is defined outside this module.
    pub fn is_external_symbol(&self, name: &str) -> bool {
        self.externs.iter().any(|e| e.name == name)
            || self.globals.iter().any(|g| &*g.name == name && g.is_external())
    }

    /// Split into the function bodies and a module holding everything else.
    pub fn take_functions(&mut self) -> Vec<FunctionData> {
        std::mem::take(&mut self.functions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_across_kinds() {
        let mut m = Module::new("m");
        m.add_function(FunctionData::new(FunctionPrototype::new("f", Type::Void, vec![])))
            .unwrap();
        assert!(m.add_extern(FunctionPrototype::new("f", Type::Void, vec![])).is_err());
        assert!(m.add_global(GlobalValue::new("f", Type::I32, GlobalInit::Zero)).is_err());
        m.add_extern(FunctionPrototype::new("puts", Type::I32, vec![Type::Ptr])).unwrap();
        assert!(m.is_external_symbol("puts"));
        assert!(!m.is_external_symbol("f"));
        assert_eq!(m.prototype("puts").map(|p| p.ret.clone()), Some(Type::I32));
    }

    #[test]
    fn test_function_lookup() {
        let m = Module::new("m");
        assert_eq!(
            m.function("missing").err(),
            Some(CompileError::FunctionNotFound { name: "missing".into() })
        );
    }
}
