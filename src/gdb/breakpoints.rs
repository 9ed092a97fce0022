//! Breakpoint bookkeeping
//!
//! Clients always send the complete set of breakpoints for one source file.
//! [`BreakpointRegistry::reconcile`] diffs that set against what GDB already
//! has and issues the minimal insert/modify/delete calls through a
//! [`BreakpointBackend`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::mi::{MiCommand, Tuple};

use super::controller::Gdb;

/// Key under which function breakpoints are stored
pub const FUNCTION_KEY: &str = "";

/// Where a breakpoint is placed; this is its identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    Line { file: String, line: u32 },
    Function { name: String },
}

impl Location {
    /// Parse `file:line` or a function name
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidLocation("empty location".to_string()));
        }
        if let Some((file, line)) = s.rsplit_once(':') {
            if let Ok(line) = line.parse::<u32>() {
                if file.is_empty() || line == 0 {
                    return Err(Error::InvalidLocation(s.to_string()));
                }
                return Ok(Location::Line {
                    file: file.to_string(),
                    line,
                });
            }
        }
        Ok(Location::Function {
            name: s.to_string(),
        })
    }

    /// Registry key: the file for line breakpoints
    pub fn file_key(&self) -> &str {
        match self {
            Location::Line { file, .. } => file,
            Location::Function { .. } => FUNCTION_KEY,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Line { file, line } => write!(f, "{}:{}", file, line),
            Location::Function { name } => write!(f, "{}", name),
        }
    }
}

/// A breakpoint, as requested and as resolved by GDB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub location: Location,
    pub condition: Option<String>,
    pub log_message: Option<String>,
    /// GDB breakpoint number, 0 while not inserted
    pub id: i64,
    pub address: Option<String>,
    pub function: Option<String>,
    /// Resolved source position, may differ from the requested one
    pub resolved_line: Option<u32>,
    pub tried: bool,
    pub error: Option<String>,
}

impl Breakpoint {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            condition: None,
            log_message: None,
            id: 0,
            address: None,
            function: None,
            resolved_line: None,
            tried: false,
            error: None,
        }
    }

    pub fn line(file: impl Into<String>, line: u32) -> Self {
        Self::new(Location::Line {
            file: file.into(),
            line,
        })
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::new(Location::Function { name: name.into() })
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into()).filter(|c: &String| !c.trim().is_empty());
        self
    }

    pub fn with_log_message(mut self, message: impl Into<String>) -> Self {
        self.log_message = Some(message.into()).filter(|m: &String| !m.is_empty());
        self
    }

    /// Verified once GDB accepted it
    pub fn is_verified(&self) -> bool {
        self.tried && self.id > 0
    }

    /// Shape reported to clients
    pub fn to_info(&self) -> BreakpointInfo {
        let (source, line) = match &self.location {
            Location::Line { file, line } => (Some(file.clone()), Some(self.resolved_line.unwrap_or(*line))),
            Location::Function { .. } => (None, self.resolved_line),
        };
        BreakpointInfo {
            id: self.id,
            verified: self.is_verified(),
            source,
            line,
            address: self.address.clone(),
            message: self.error.clone(),
        }
    }
}

/// Client-facing breakpoint status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub id: i64,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What GDB answered to an insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inserted {
    pub id: i64,
    pub address: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Inserted {
    /// Read the `bkpt` tuple of a `-break-insert` / `-dprintf-insert` result
    ///
    /// Breakpoints with several locations report `addr="<MULTIPLE>"` and
    /// list the locations as continuation tuples; the first one is used.
    pub fn from_results(results: &Tuple) -> Result<Self> {
        let bkpt = results
            .get_tuple("bkpt")
            .ok_or_else(|| Error::Internal("insert result without bkpt".to_string()))?;
        let first = bkpt.get_tuple("@children.0");

        let id = bkpt
            .get_parsed::<i64>("number")
            .or_else(|| {
                first
                    .and_then(|t| t.get_str("number"))
                    .and_then(|n| n.split('.').next())
                    .and_then(|n| n.parse().ok())
            })
            .ok_or_else(|| Error::Internal("insert result without breakpoint number".to_string()))?;

        let resolved = match bkpt.get_str("addr") {
            Some("<MULTIPLE>") => first.unwrap_or(bkpt),
            _ => bkpt,
        };

        Ok(Self {
            id,
            address: resolved.get_str("addr").map(str::to_string),
            function: resolved
                .get_str("func")
                .or_else(|| bkpt.get_str("func"))
                .map(str::to_string),
            file: resolved.get_str("fullname").or_else(|| resolved.get_str("file")).map(str::to_string),
            line: resolved.get_parsed("line"),
        })
    }
}

/// Operations the registry needs from the debugger
#[async_trait]
pub trait BreakpointBackend: Send + Sync {
    async fn insert(&self, breakpoint: &Breakpoint) -> Result<Inserted>;
    /// Replace the condition of an existing breakpoint
    async fn set_condition(&self, id: i64, condition: Option<&str>) -> Result<()>;
    async fn delete(&self, ids: &[i64]) -> Result<()>;
}

#[async_trait]
impl BreakpointBackend for Gdb {
    async fn insert(&self, breakpoint: &Breakpoint) -> Result<Inserted> {
        let condition = breakpoint.condition.as_deref();
        let command = match (&breakpoint.location, &breakpoint.log_message) {
            (Location::Line { file, line }, Some(message)) => {
                let mut command = MiCommand::new("dprintf-insert");
                if let Some(condition) = condition {
                    command = command.arg("-c").quoted(condition);
                }
                command
                    .arg("--source")
                    .path(file)
                    .arg("--line")
                    .arg(line)
                    .quoted(&format!("{}\n", message))
            }
            (Location::Line { file, line }, None) => {
                let mut command = MiCommand::new("break-insert");
                if let Some(condition) = condition {
                    command = command.arg("-c").quoted(condition);
                }
                command.arg("--source").path(file).arg("--line").arg(line)
            }
            (Location::Function { name }, _) => {
                let mut command = MiCommand::new("break-insert");
                if let Some(condition) = condition {
                    command = command.arg("-c").quoted(condition);
                }
                command.arg("--function").arg(name)
            }
        };
        let result = self.command_ensure(command).await?;
        Inserted::from_results(&result.results)
    }

    async fn set_condition(&self, id: i64, condition: Option<&str>) -> Result<()> {
        let mut command = MiCommand::new("break-condition").arg(id);
        if let Some(condition) = condition {
            command = command.quoted(condition);
        }
        self.command_ensure(command).await?;
        Ok(())
    }

    async fn delete(&self, ids: &[i64]) -> Result<()> {
        let mut command = MiCommand::new("break-delete");
        for id in ids {
            command = command.arg(id);
        }
        self.command_ensure(command).await?;
        Ok(())
    }
}

/// Result of one reconcile pass
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// One entry per requested breakpoint, in request order
    pub breakpoints: Vec<Breakpoint>,
    /// Breakpoints deleted from GDB because they were no longer requested
    pub removed: Vec<Breakpoint>,
    /// Duplicates GDB created on an already used address, deleted again
    pub rejected: Vec<i64>,
}

/// Breakpoints GDB currently has, keyed by source file
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    files: HashMap<String, Vec<Breakpoint>>,
    /// Locations that resolved onto another breakpoint's address
    aliases: HashMap<String, HashMap<Location, i64>>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breakpoints stored for a file
    pub fn file(&self, key: &str) -> &[Breakpoint] {
        self.files.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, id: i64) -> Option<&Breakpoint> {
        self.files.values().flatten().find(|b| b.id == id)
    }

    fn find_mut(&mut self, id: i64) -> Option<&mut Breakpoint> {
        self.files.values_mut().flatten().find(|b| b.id == id)
    }

    /// Any stored breakpoint already occupying `address`, other than `id`
    fn at_address(&self, address: &str, id: i64) -> Option<&Breakpoint> {
        self.files
            .values()
            .flatten()
            .find(|b| b.id != id && b.id > 0 && b.address.as_deref() == Some(address))
    }

    /// Make GDB's breakpoints for `key` match `desired`
    pub async fn reconcile<B: BreakpointBackend + ?Sized>(
        &mut self,
        key: &str,
        desired: Vec<Breakpoint>,
        backend: &B,
    ) -> ReconcileOutcome {
        let existing = self.files.remove(key).unwrap_or_default();
        let mut aliases = self.aliases.remove(key).unwrap_or_default();
        let mut outcome = ReconcileOutcome::default();
        let mut kept: Vec<Breakpoint> = Vec::new();
        let mut stale: Vec<Breakpoint> = Vec::new();
        let requested: HashSet<Location> = desired.iter().map(|b| b.location.clone()).collect();

        for wanted in desired {
            if let Some(target) = aliases.get(&wanted.location).copied() {
                let found = kept
                    .iter()
                    .chain(existing.iter())
                    .find(|b| b.id == target)
                    .cloned()
                    .or_else(|| self.find(target).cloned());
                if let Some(found) = found {
                    if existing.iter().any(|b| b.id == target) && !kept.iter().any(|b| b.id == target) {
                        kept.push(found.clone());
                    }
                    outcome.breakpoints.push(found);
                    continue;
                }
                aliases.remove(&wanted.location);
            }

            let current = existing
                .iter()
                .find(|b| b.id > 0 && b.location == wanted.location);
            // Addresses held by breakpoints that survive this pass
            let occupied: Vec<Breakpoint> = kept
                .iter()
                .chain(existing.iter().filter(|b| {
                    b.id > 0 && b.location != wanted.location && requested.contains(&b.location)
                }))
                .cloned()
                .collect();

            let placed = match current {
                Some(current)
                    if current.condition == wanted.condition
                        && current.log_message == wanted.log_message =>
                {
                    current.clone()
                }
                Some(current) if current.log_message == wanted.log_message => {
                    let mut updated = current.clone();
                    match backend.set_condition(current.id, wanted.condition.as_deref()).await {
                        Ok(()) => {
                            updated.condition = wanted.condition.clone();
                            updated.error = None;
                        }
                        Err(e) => {
                            tracing::warn!(id = current.id, error = %e, "failed to change condition");
                            updated.error = Some(e.to_string());
                        }
                    }
                    updated
                }
                Some(current) => {
                    // dprintf text cannot be changed in place; the old one
                    // goes with the stale set below
                    stale.push(current.clone());
                    match self.insert(key, wanted, &occupied, backend, &mut aliases, &mut outcome).await {
                        Some(bp) => bp,
                        None => continue,
                    }
                }
                None => match self.insert(key, wanted, &occupied, backend, &mut aliases, &mut outcome).await {
                    Some(bp) => bp,
                    None => continue,
                },
            };

            if placed.id > 0 && !kept.iter().any(|b| b.id == placed.id) {
                kept.push(placed.clone());
            }
            outcome.breakpoints.push(placed);
        }

        let keep_ids: HashSet<i64> = kept.iter().map(|b| b.id).collect();
        let removed: Vec<Breakpoint> = existing
            .into_iter()
            .filter(|b| b.id > 0 && !keep_ids.contains(&b.id))
            .chain(stale.into_iter().filter(|b| !keep_ids.contains(&b.id)))
            .fold(Vec::new(), |mut acc, b| {
                if !acc.iter().any(|a: &Breakpoint| a.id == b.id) {
                    acc.push(b);
                }
                acc
            });

        if !removed.is_empty() {
            let ids: Vec<i64> = removed.iter().map(|b| b.id).collect();
            if let Err(e) = backend.delete(&ids).await {
                tracing::warn!(?ids, error = %e, "failed to delete breakpoints");
            }
            aliases.retain(|_, target| !ids.contains(target));
        }
        outcome.removed = removed;

        tracing::debug!(
            file = key,
            count = kept.len(),
            removed = outcome.removed.len(),
            "breakpoints reconciled"
        );
        if !kept.is_empty() {
            self.files.insert(key.to_string(), kept);
        }
        if !aliases.is_empty() {
            self.aliases.insert(key.to_string(), aliases);
        }
        outcome
    }

    /// Insert one breakpoint, resolving address collisions
    ///
    /// Returns `None` only when the entry was already pushed to the outcome.
    async fn insert<B: BreakpointBackend + ?Sized>(
        &self,
        key: &str,
        mut wanted: Breakpoint,
        occupied: &[Breakpoint],
        backend: &B,
        aliases: &mut HashMap<Location, i64>,
        outcome: &mut ReconcileOutcome,
    ) -> Option<Breakpoint> {
        wanted.tried = true;
        let inserted = match backend.insert(&wanted).await {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::info!(location = %wanted.location, error = %e, "breakpoint not inserted");
                wanted.id = 0;
                wanted.error = Some(e.to_string());
                outcome.breakpoints.push(wanted);
                return None;
            }
        };

        if let Some(address) = inserted.address.as_deref() {
            let occupant = occupied
                .iter()
                .find(|b| b.id != inserted.id && b.address.as_deref() == Some(address))
                .or_else(|| self.at_address(address, inserted.id));
            if let Some(occupant) = occupant {
                tracing::info!(
                    file = key,
                    address,
                    kept = occupant.id,
                    duplicate = inserted.id,
                    "breakpoint on an occupied address"
                );
                if let Err(e) = backend.delete(&[inserted.id]).await {
                    tracing::warn!(id = inserted.id, error = %e, "failed to delete duplicate breakpoint");
                }
                outcome.rejected.push(inserted.id);
                aliases.insert(wanted.location.clone(), occupant.id);
                return Some(occupant.clone());
            }
        }

        wanted.id = inserted.id;
        wanted.address = inserted.address;
        wanted.function = inserted.function;
        wanted.resolved_line = inserted.line;
        wanted.error = None;
        tracing::info!(
            id = wanted.id,
            function = wanted.function.as_deref().unwrap_or("??"),
            location = %wanted.location,
            "new breakpoint"
        );
        Some(wanted)
    }

    /// Change the condition of a breakpoint by number
    pub async fn set_condition<B: BreakpointBackend + ?Sized>(
        &mut self,
        id: i64,
        condition: Option<String>,
        backend: &B,
    ) -> Result<()> {
        backend.set_condition(id, condition.as_deref()).await?;
        if let Some(bp) = self.find_mut(id) {
            bp.condition = condition;
        }
        Ok(())
    }

    /// Forget everything, e.g. after GDB went away
    pub fn clear(&mut self) {
        self.files.clear();
        self.aliases.clear();
    }
}
