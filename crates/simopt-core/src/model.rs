use crate::case::{Case, CaseError, VariableKind, VariableValue};
use crate::error::{EngineError, EngineResult};
use crate::sync::ModelSyncObject;
use crate::token::Token;
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(flatten)]
    pub value: VariableValue,
}

/// On-disk description of the optimization variables.
///
/// ```json
/// { "name": "five_spot", "variables": [
///     { "name": "BHP#PROD#0", "kind": "real", "value": 150.0 } ] }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ModelDefinition {
    #[serde(default)]
    pub name: String,
    pub variables: Vec<VariableDefinition>,
}

impl ModelDefinition {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let content = fs::read_to_string(path)?;
        let def: Self = serde_json::from_str(&content)?;
        def.validate()?;
        Ok(def)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if let Some(v) = self.variables.iter().find(|v| v.name.trim().is_empty()) {
            return Err(EngineError::Model(format!(
                "variable with value {} has an empty name",
                v.value
            )));
        }
        if let Some(dup) = self.variables.iter().map(|v| &v.name).duplicates().next() {
            return Err(EngineError::Model(format!(
                "variable name '{}' is declared more than once",
                dup
            )));
        }
        Ok(())
    }

    pub fn count(&self, kind: VariableKind) -> usize {
        self.variables
            .iter()
            .filter(|v| v.value.kind() == kind)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: Token,
    pub name: String,
    pub value: VariableValue,
}

impl Variable {
    pub fn kind(&self) -> VariableKind {
        self.value.kind()
    }
}

/// A process-local model instance: every variable with the id this process
/// assigned to it.
#[derive(Debug, Clone)]
pub struct VariableContainer {
    variables: Vec<Variable>,
    index: FnvHashMap<Token, usize>,
}

impl VariableContainer {
    /// Builds the container with freshly generated ids. Two containers built
    /// from the same definition share names but not ids.
    pub fn from_definition(def: &ModelDefinition) -> EngineResult<Self> {
        def.validate()?;
        let variables = def
            .variables
            .iter()
            .map(|v| Variable {
                id: Token::generate(),
                name: v.name.clone(),
                value: v.value,
            })
            .collect();
        let mut container = Self {
            variables,
            index: FnvHashMap::default(),
        };
        container.reindex()?;
        debug!("Built model with {} variables", container.len());
        Ok(container)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        Self::from_definition(&ModelDefinition::load_from_file(path)?)
    }

    fn reindex(&mut self) -> EngineResult<()> {
        self.index.clear();
        for (i, v) in self.variables.iter().enumerate() {
            if self.index.insert(v.id, i).is_some() {
                return Err(EngineError::ModelSync(format!(
                    "id {} is assigned to more than one variable",
                    v.id
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    pub fn get(&self, id: &Token) -> Option<&Variable> {
        self.index.get(id).map(|&i| &self.variables[i])
    }

    pub fn name_of(&self, kind: VariableKind, id: &Token) -> Option<&str> {
        self.get(id)
            .filter(|v| v.kind() == kind)
            .map(|v| v.name.as_str())
    }

    pub fn id_of(&self, kind: VariableKind, name: &str) -> Option<Token> {
        self.variables
            .iter()
            .find(|v| v.kind() == kind && v.name == name)
            .map(|v| v.id)
    }

    /// A case holding the current value of every variable.
    pub fn base_case(&self) -> Case {
        let mut binary = BTreeMap::new();
        let mut integer = BTreeMap::new();
        let mut real = BTreeMap::new();
        for v in &self.variables {
            match v.value {
                VariableValue::Binary(b) => {
                    binary.insert(v.id, b);
                }
                VariableValue::Integer(i) => {
                    integer.insert(v.id, i);
                }
                VariableValue::Real(r) => {
                    real.insert(v.id, r);
                }
            }
        }
        Case::new(binary, integer, real)
    }

    fn slot_mut(
        &mut self,
        case: Token,
        id: Token,
        kind: VariableKind,
    ) -> EngineResult<&mut VariableValue> {
        match self.index.get(&id) {
            Some(&i) if self.variables[i].kind() == kind => Ok(&mut self.variables[i].value),
            _ => Err(CaseError::UnknownVariable { case, variable: id }.into()),
        }
    }

    /// Writes the case's values into the model. Every id in the case must
    /// name a variable of the same kind here.
    pub fn apply_case(&mut self, case: &Case) -> EngineResult<()> {
        let cid = case.id();
        for (id, v) in case.binary_variables() {
            *self.slot_mut(cid, *id, VariableKind::Binary)? = VariableValue::Binary(*v);
        }
        for (id, v) in case.integer_variables() {
            *self.slot_mut(cid, *id, VariableKind::Integer)? = VariableValue::Integer(*v);
        }
        for (id, v) in case.real_variables() {
            *self.slot_mut(cid, *id, VariableKind::Real)? = VariableValue::Real(*v);
        }
        Ok(())
    }

    /// The case's values keyed by variable name.
    pub fn named_values(&self, case: &Case) -> EngineResult<BTreeMap<String, VariableValue>> {
        let lookup = |id: &Token, kind| {
            self.name_of(kind, id)
                .map(str::to_string)
                .ok_or(CaseError::UnknownVariable {
                    case: case.id(),
                    variable: *id,
                })
        };
        let mut out = BTreeMap::new();
        for (id, v) in case.binary_variables() {
            out.insert(lookup(id, VariableKind::Binary)?, VariableValue::Binary(*v));
        }
        for (id, v) in case.integer_variables() {
            out.insert(lookup(id, VariableKind::Integer)?, VariableValue::Integer(*v));
        }
        for (id, v) in case.real_variables() {
            out.insert(lookup(id, VariableKind::Real)?, VariableValue::Real(*v));
        }
        Ok(out)
    }

    pub fn sync_object(&self) -> ModelSyncObject {
        let mut mso = ModelSyncObject::default();
        for v in &self.variables {
            mso.mapping_mut(v.kind()).insert(v.name.clone(), v.id);
        }
        mso
    }

    /// Replaces every local id with the id the coordinator assigned to the
    /// variable of the same name and kind.
    ///
    /// The two sides must agree exactly on the set of names per kind; a
    /// partial match means the model instances diverged and nothing is
    /// changed.
    pub fn apply_sync(&mut self, mso: &ModelSyncObject) -> EngineResult<()> {
        let mut new_ids = Vec::with_capacity(self.variables.len());
        for v in &self.variables {
            let id = mso.mapping(v.kind()).get(&v.name).ok_or_else(|| {
                EngineError::ModelSync(format!(
                    "{} variable '{}' is missing from the coordinator mapping",
                    v.kind(),
                    v.name
                ))
            })?;
            new_ids.push(*id);
        }

        for kind in [
            VariableKind::Binary,
            VariableKind::Integer,
            VariableKind::Real,
        ] {
            let local = self.variables.iter().filter(|v| v.kind() == kind).count();
            let remote = mso.mapping(kind).len();
            if local != remote {
                let extra = mso
                    .mapping(kind)
                    .keys()
                    .find(|name| self.id_of(kind, name).is_none())
                    .cloned()
                    .unwrap_or_default();
                return Err(EngineError::ModelSync(format!(
                    "coordinator has {} {} variables, this model has {} (first unknown: '{}')",
                    remote, kind, local, extra
                )));
            }
        }

        if let Some(dup) = new_ids.iter().duplicates().next() {
            return Err(EngineError::ModelSync(format!(
                "coordinator assigned id {} to more than one variable",
                dup
            )));
        }

        for (v, id) in self.variables.iter_mut().zip(new_ids) {
            v.id = id;
        }
        self.reindex()?;
        info!(
            "🔗 Model synchronized: {} variables, fingerprint {}",
            self.len(),
            &mso.fingerprint()[..12]
        );
        Ok(())
    }
}
