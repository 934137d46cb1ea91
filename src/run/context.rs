use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Data visible to a run: free-form variables, a shared blackboard and a
/// stack of lexical scopes (innermost last).
///
/// Everything here is owned JSON data, so `clone()` is a full deep copy and
/// never aliases the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub blackboard: Map<String, Value>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

impl RunContext {
    pub fn with_variables(variables: Map<String, Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    pub fn push_scope(&mut self, id: impl Into<String>, name: Option<String>) {
        self.scopes.push(Scope {
            id: id.into(),
            name,
            variables: Map::new(),
        });
    }

    pub fn pop_scope(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    /// Sets a variable in the innermost scope, or in `variables` when no
    /// scope is open.
    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.variables.insert(key.into(), value);
            }
            None => {
                self.variables.insert(key.into(), value);
            }
        }
    }

    /// Resolves a dotted path.
    ///
    /// `blackboard.` and `variables.` prefixes address those maps directly.
    /// Bare paths search scopes innermost-first, then `variables`, then the
    /// blackboard.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.').filter(|segment| !segment.is_empty());
        let head = segments.next()?;
        let rest = segments.collect::<Vec<_>>();

        match head {
            "blackboard" => return resolve_in_map(&self.blackboard, &rest),
            "variables" => return resolve_in_map(&self.variables, &rest),
            _ => {}
        }

        let mut full = Vec::with_capacity(rest.len() + 1);
        full.push(head);
        full.extend(rest);

        self.scopes
            .iter()
            .rev()
            .map(|scope| &scope.variables)
            .chain([&self.variables, &self.blackboard])
            .find_map(|map| resolve_in_map(map, &full))
    }

    /// Layers `overrides` on top of this context: variables and blackboard
    /// keys are replaced one by one, scopes are replaced wholesale.
    pub fn merged_with(&self, overrides: &RunContext) -> RunContext {
        let mut merged = self.clone();
        for (key, value) in &overrides.variables {
            merged.variables.insert(key.clone(), value.clone());
        }
        for (key, value) in &overrides.blackboard {
            merged.blackboard.insert(key.clone(), value.clone());
        }
        merged.scopes = overrides.scopes.clone();
        merged
    }
}

fn resolve_in_map<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = map.get(*first)?;
    for segment in rest {
        current = match current {
            Value::Object(object) => object.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
