//! GDB variable objects and the handles clients use to expand them

use std::collections::HashMap;

use serde::Serialize;

use crate::common::{Error, Result};
use crate::mi::{ListItem, MiCommand, Tuple};

use super::controller::Gdb;

/// First handle for stack-frame scopes
pub const STACK_HANDLES_START: i64 = 1000;
/// First handle for variable objects, above every possible frame scope
pub const VAR_HANDLES_START: i64 = 512 * 256 + 1000;

/// One `-var-create` object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableObject {
    /// GDB's name for the object (`var_1001_count`, `var_1001_count.field`)
    pub name: String,
    /// Expression relative to the parent
    pub exp: String,
    pub numchild: u32,
    pub type_name: String,
    pub value: String,
    pub thread_id: Option<u32>,
    pub frozen: bool,
    pub dynamic: bool,
    pub display_hint: Option<String>,
    pub has_more: bool,
    /// Handle given to clients, 0 until registered
    pub id: i64,
}

impl VariableObject {
    pub fn from_tuple(tuple: &Tuple) -> Self {
        let name = tuple.get_str("name").unwrap_or_default().to_string();
        Self {
            exp: tuple.get_str("exp").map(str::to_string).unwrap_or_else(|| name.clone()),
            name,
            numchild: tuple.get_parsed("numchild").unwrap_or(0),
            type_name: tuple.get_str("type").unwrap_or_default().to_string(),
            value: tuple.get_str("value").unwrap_or_default().to_string(),
            thread_id: tuple.get_parsed("thread-id"),
            frozen: tuple.get_str("frozen") == Some("1"),
            dynamic: tuple.get_str("dynamic") == Some("1"),
            display_hint: tuple.get_str("displayhint").map(str::to_string),
            has_more: tuple.get_str("has_more") == Some("1"),
            id: 0,
        }
    }

    /// Apply one entry of a `-var-update` changelist
    pub fn apply_changes(&mut self, change: &Tuple) {
        if let Some(value) = change.get_str("value") {
            self.value = value.to_string();
        }
        if change.get_str("type_changed") == Some("true") {
            if let Some(new_type) = change.get_str("new_type") {
                self.type_name = new_type.to_string();
            }
            if let Some(numchild) = change.get_parsed("new_num_children") {
                self.numchild = numchild;
            }
        }
        if let Some(dynamic) = change.get_str("dynamic") {
            self.dynamic = dynamic == "1";
        }
        if let Some(hint) = change.get_str("displayhint") {
            self.display_hint = Some(hint.to_string());
        }
        if let Some(has_more) = change.get_str("has_more") {
            self.has_more = has_more == "1";
        }
    }

    /// Whether clients can expand the object
    pub fn is_compound(&self) -> bool {
        self.numchild > 0
            || self.value == "{...}"
            || (self.dynamic
                && matches!(self.display_hint.as_deref(), Some("array") | Some("map")))
    }

    pub fn to_variable(&self) -> Variable {
        Variable {
            name: self.exp.clone(),
            value: self.value.clone(),
            type_name: Some(self.type_name.clone()).filter(|t| !t.is_empty()),
            variables_reference: if self.is_compound() { self.id } else { 0 },
            evaluate_name: Some(self.exp.clone()),
        }
    }
}

/// Variable as reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Non-zero when the variable can be expanded
    pub variables_reference: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluate_name: Option<String>,
}

/// Variable objects known to GDB, with their client handles
#[derive(Debug)]
pub struct VariableObjects {
    next_handle: i64,
    objects: HashMap<i64, VariableObject>,
    handles: HashMap<String, i64>,
}

impl Default for VariableObjects {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableObjects {
    pub fn new() -> Self {
        Self {
            next_handle: VAR_HANDLES_START,
            objects: HashMap::new(),
            handles: HashMap::new(),
        }
    }

    /// Store an object, reusing the handle of an object with the same name
    pub fn register(&mut self, mut object: VariableObject) -> i64 {
        let id = match self.handles.get(&object.name) {
            Some(id) => *id,
            None => {
                let id = self.next_handle;
                self.next_handle += 1;
                self.handles.insert(object.name.clone(), id);
                id
            }
        };
        object.id = id;
        self.objects.insert(id, object);
        id
    }

    pub fn get(&self, handle: i64) -> Option<&VariableObject> {
        self.objects.get(&handle)
    }

    pub fn by_name(&self, name: &str) -> Option<&VariableObject> {
        self.handles.get(name).and_then(|id| self.objects.get(id))
    }

    /// Apply a `-var-update` changelist to the objects it names
    pub fn apply_changelist(&mut self, changes: &[ListItem]) {
        for change in changes.iter().filter_map(ListItem::as_tuple) {
            let Some(name) = change.get_str("name") else {
                continue;
            };
            match self.handles.get(name).and_then(|id| self.objects.get_mut(id)) {
                Some(object) => object.apply_changes(change),
                None => tracing::debug!(name, "change for unknown variable object"),
            }
        }
    }

    /// Forget an object, keeping its handle reserved for the name
    fn forget(&mut self, name: &str) {
        if let Some(id) = self.handles.get(name) {
            self.objects.remove(id);
        }
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.handles.clear();
    }

    /// Create `name` for `expression` in the given frame, or refresh it
    ///
    /// GDB drops variable objects on some transitions; an update that fails
    /// with "Variable object not found" re-creates the object under the same
    /// name and handle.
    pub async fn fetch(
        &mut self,
        gdb: &Gdb,
        name: &str,
        expression: &str,
        thread: u32,
        frame: u32,
    ) -> Result<VariableObject> {
        if self.by_name(name).is_some() {
            let update = MiCommand::new("var-update").arg("--all-values").arg(name);
            match gdb.command_ensure(update).await {
                Ok(result) => {
                    if let Some(changes) = result.results.get_list("changelist") {
                        self.apply_changelist(changes);
                    }
                    if let Some(object) = self.by_name(name) {
                        return Ok(object.clone());
                    }
                }
                Err(Error::BackendRejection { message, .. })
                    if message.contains("Variable object not found") =>
                {
                    tracing::debug!(name, "variable object vanished, re-creating");
                    self.forget(name);
                }
                Err(e) => return Err(e),
            }
        }

        let create = MiCommand::new("var-create")
            .option("--thread", Some(thread))
            .option("--frame", Some(frame))
            .arg(name)
            .arg("*")
            .quoted(expression);
        let result = gdb.command_ensure(create).await?;
        let mut object = VariableObject::from_tuple(&result.results);
        object.exp = expression.to_string();
        let id = self.register(object);
        self.get(id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("variable object {name} not stored")))
    }

    /// List and register the children of a handle
    pub async fn children(&mut self, gdb: &Gdb, handle: i64) -> Result<Vec<VariableObject>> {
        let parent = self.get(handle).ok_or(Error::UnknownReference(handle))?;
        let command = MiCommand::new("var-list-children")
            .arg("--all-values")
            .arg(&parent.name);
        let result = gdb.command_ensure(command).await?;

        let mut children = Vec::new();
        for child in result
            .results
            .get_list("children")
            .unwrap_or_default()
            .iter()
            .filter_map(ListItem::as_tuple)
        {
            let id = self.register(VariableObject::from_tuple(child));
            if let Some(object) = self.get(id) {
                children.push(object.clone());
            }
        }
        Ok(children)
    }

    /// Assign a new value through the variable object, returns GDB's value
    pub async fn assign(&mut self, gdb: &Gdb, name: &str, value: &str) -> Result<String> {
        let command = MiCommand::new("var-assign").arg(name).quoted(value);
        let result = gdb.command_ensure(command).await?;
        let new_value = result.results.get_str("value").unwrap_or(value).to_string();
        if let Some(id) = self.handles.get(name).copied() {
            if let Some(object) = self.objects.get_mut(&id) {
                object.value = new_value.clone();
            }
        }
        Ok(new_value)
    }
}

/// Name of the variable object backing a local in a scope
pub fn varobj_name(scope: i64, variable: &str) -> String {
    format!("var_{}_{}", scope, variable)
}
