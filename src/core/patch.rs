//! Patch interpreter: typed field operations over a `GameState`.
//!
//! A patch document is a JSON object mapping field names to operator values.
//! Parsing turns it into a [`Patch`], a closed set of [`PatchOp`]s keyed by
//! field, so every shape error surfaces before any state is touched.
//! Applying a patch works on a copy and never fails.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::derived;
use crate::core::rules::{TurnLimits, AFFINITY_MAX};
use crate::schema::state::GameState;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    #[error("malformed patch field `{field}`: {reason}")]
    MalformedPatch { field: String, reason: String },
}

fn malformed(field: &str, reason: impl Into<String>) -> PatchError {
    PatchError::MalformedPatch {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Patchable fields, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatchField {
    Turn,
    TotalTurnsUsed,
    CharacterTurnsUsed,
    Scene,
    Affinity,
    Allies,
    Flags,
    Route,
    Ending,
    EndReason,
    UserChoice,
    DialogueRules,
    SceneHistory,
    LastUserMsg,
}

impl PatchField {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Turn => "turn",
            Self::TotalTurnsUsed => "total_turns_used",
            Self::CharacterTurnsUsed => "character_turns_used",
            Self::Scene => "scene",
            Self::Affinity => "affinity",
            Self::Allies => "allies",
            Self::Flags => "flags",
            Self::Route => "route",
            Self::Ending => "ending",
            Self::EndReason => "end_reason",
            Self::UserChoice => "user_choice",
            Self::DialogueRules => "dialogue_rules",
            Self::SceneHistory => "scene_history",
            Self::LastUserMsg => "last_user_msg",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "turn" => Self::Turn,
            "total_turns_used" => Self::TotalTurnsUsed,
            "character_turns_used" => Self::CharacterTurnsUsed,
            "scene" => Self::Scene,
            "affinity" => Self::Affinity,
            "allies" => Self::Allies,
            "flags" => Self::Flags,
            "route" => Self::Route,
            "ending" => Self::Ending,
            "end_reason" => Self::EndReason,
            "user_choice" => Self::UserChoice,
            "dialogue_rules" => Self::DialogueRules,
            "scene_history" => Self::SceneHistory,
            "last_user_msg" => Self::LastUserMsg,
            _ => return None,
        })
    }
}

/// Absolute set or relative increment of a non-negative counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    Set(i64),
    Inc(i64),
}

impl CounterOp {
    /// Result clamped to `0..=max`.
    pub fn apply(self, current: u32, max: u32) -> u32 {
        let raw = match self {
            Self::Set(value) => value,
            Self::Inc(delta) => i64::from(current).saturating_add(delta),
        };
        raw.clamp(0, i64::from(max)) as u32
    }

    fn parse(field: &str, value: &Value) -> Result<Self, PatchError> {
        if let Some(n) = value.as_i64() {
            return Ok(Self::Set(n));
        }
        let obj = value
            .as_object()
            .ok_or_else(|| malformed(field, "expected an integer or {inc: n}"))?;
        let delta = operator(obj, "inc")
            .and_then(Value::as_i64)
            .filter(|_| obj.len() == 1)
            .ok_or_else(|| malformed(field, "expected an integer or {inc: n}"))?;
        Ok(Self::Inc(delta))
    }

    fn to_value(self) -> Value {
        match self {
            Self::Set(n) => Value::from(n),
            Self::Inc(n) => serde_json::json!({ "inc": n }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Turn,
    TotalTurnsUsed,
}

/// Per-character counter maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    CharacterTurnsUsed,
    Affinity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTarget {
    Scene,
    DialogueRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Route,
    Ending,
    UserChoice,
    LastUserMsg,
}

/// Set-like edit of the flag list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagsOp {
    /// Full replace, de-duplicated keeping first occurrence.
    Replace(Vec<String>),
    /// Adds first, then removes.
    Edit { add: Vec<String>, remove: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOp {
    Extend(Vec<String>),
    Push(String),
}

/// One field's operation. Each variant is a field class.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Counter(Counter, CounterOp),
    Tally(Tally, Vec<(String, CounterOp)>),
    Allies(Vec<(String, bool)>),
    Flags(FlagsOp),
    Merge(MergeTarget, Map<String, Value>),
    Append(HistoryOp),
    Overwrite(Scalar, Option<String>),
    /// `end_reason`: ignored once the state holds a non-empty value.
    /// `None` or `""` proposes nothing.
    Sticky(Option<String>),
}

impl PatchOp {
    pub fn field(&self) -> PatchField {
        match self {
            Self::Counter(Counter::Turn, _) => PatchField::Turn,
            Self::Counter(Counter::TotalTurnsUsed, _) => PatchField::TotalTurnsUsed,
            Self::Tally(Tally::CharacterTurnsUsed, _) => PatchField::CharacterTurnsUsed,
            Self::Tally(Tally::Affinity, _) => PatchField::Affinity,
            Self::Allies(_) => PatchField::Allies,
            Self::Flags(_) => PatchField::Flags,
            Self::Merge(MergeTarget::Scene, _) => PatchField::Scene,
            Self::Merge(MergeTarget::DialogueRules, _) => PatchField::DialogueRules,
            Self::Append(_) => PatchField::SceneHistory,
            Self::Overwrite(Scalar::Route, _) => PatchField::Route,
            Self::Overwrite(Scalar::Ending, _) => PatchField::Ending,
            Self::Overwrite(Scalar::UserChoice, _) => PatchField::UserChoice,
            Self::Overwrite(Scalar::LastUserMsg, _) => PatchField::LastUserMsg,
            Self::Sticky(_) => PatchField::EndReason,
        }
    }

    fn parse(field: PatchField, value: &Value) -> Result<Self, PatchError> {
        let key = field.key();
        Ok(match field {
            PatchField::Turn => Self::Counter(Counter::Turn, CounterOp::parse(key, value)?),
            PatchField::TotalTurnsUsed => {
                Self::Counter(Counter::TotalTurnsUsed, CounterOp::parse(key, value)?)
            }
            PatchField::CharacterTurnsUsed => {
                Self::Tally(Tally::CharacterTurnsUsed, parse_tally(key, value)?)
            }
            PatchField::Affinity => Self::Tally(Tally::Affinity, parse_tally(key, value)?),
            PatchField::Allies => {
                let entries = object(key, value)?
                    .iter()
                    .map(|(character, v)| {
                        v.as_bool()
                            .map(|b| (character.clone(), b))
                            .ok_or_else(|| malformed(key, format!("`{character}` must be a boolean")))
                    })
                    .collect::<Result<_, _>>()?;
                Self::Allies(entries)
            }
            PatchField::Flags => Self::Flags(parse_flags(value)?),
            PatchField::Scene => {
                let entries = object(key, value)?;
                if let Some(current) = entries.get("current_scene") {
                    if !(current.is_string() || current.is_null()) {
                        return Err(malformed(key, "`current_scene` must be a string"));
                    }
                }
                Self::Merge(MergeTarget::Scene, entries.clone())
            }
            PatchField::DialogueRules => {
                Self::Merge(MergeTarget::DialogueRules, object(key, value)?.clone())
            }
            PatchField::SceneHistory => Self::Append(parse_history(value)?),
            PatchField::Route => Self::Overwrite(Scalar::Route, optional_string(key, value)?),
            PatchField::Ending => Self::Overwrite(Scalar::Ending, optional_string(key, value)?),
            PatchField::UserChoice => {
                Self::Overwrite(Scalar::UserChoice, optional_string(key, value)?)
            }
            PatchField::LastUserMsg => Self::Overwrite(
                Scalar::LastUserMsg,
                Some(optional_string(key, value)?.unwrap_or_default()),
            ),
            PatchField::EndReason => Self::Sticky(optional_string(key, value)?),
        })
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Counter(_, op) => op.to_value(),
            Self::Tally(_, entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, op)| (k.clone(), op.to_value()))
                    .collect(),
            ),
            Self::Allies(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, b)| (k.clone(), Value::Bool(*b)))
                    .collect(),
            ),
            Self::Flags(FlagsOp::Replace(flags)) => serde_json::json!(flags),
            Self::Flags(FlagsOp::Edit { add, remove }) => {
                serde_json::json!({ "add": add, "remove": remove })
            }
            Self::Merge(_, entries) => Value::Object(entries.clone()),
            Self::Append(HistoryOp::Extend(items)) => serde_json::json!(items),
            Self::Append(HistoryOp::Push(item)) => serde_json::json!({ "push": item }),
            Self::Overwrite(_, value) => serde_json::json!(value),
            Self::Sticky(value) => serde_json::json!(value),
        }
    }
}

/// Operator lookup accepting both `op` and `$op` spellings.
fn operator<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).or_else(|| obj.get(&format!("${name}")))
}

fn object<'a>(field: &str, value: &'a Value) -> Result<&'a Map<String, Value>, PatchError> {
    value
        .as_object()
        .ok_or_else(|| malformed(field, "expected an object"))
}

fn string(field: &str, value: &Value) -> Result<String, PatchError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(field, "expected a string"))
}

fn optional_string(field: &str, value: &Value) -> Result<Option<String>, PatchError> {
    if value.is_null() {
        return Ok(None);
    }
    string(field, value).map(Some)
}

fn string_list(field: &str, value: &Value) -> Result<Vec<String>, PatchError> {
    value
        .as_array()
        .ok_or_else(|| malformed(field, "expected a list of strings"))?
        .iter()
        .map(|item| string(field, item))
        .collect()
}

fn parse_tally(field: &str, value: &Value) -> Result<Vec<(String, CounterOp)>, PatchError> {
    object(field, value)?
        .iter()
        .map(|(character, v)| Ok((character.clone(), CounterOp::parse(field, v)?)))
        .collect()
}

fn parse_flags(value: &Value) -> Result<FlagsOp, PatchError> {
    let key = PatchField::Flags.key();
    if value.is_array() {
        let mut flags: Vec<String> = Vec::new();
        for flag in string_list(key, value)? {
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
        return Ok(FlagsOp::Replace(flags));
    }
    let obj = value
        .as_object()
        .ok_or_else(|| malformed(key, "expected a list or {add, remove}"))?;
    let add = operator(obj, "add");
    let remove = operator(obj, "remove");
    let recognised = usize::from(add.is_some()) + usize::from(remove.is_some());
    if recognised == 0 || recognised != obj.len() {
        return Err(malformed(key, "expected a list or {add, remove}"));
    }
    Ok(FlagsOp::Edit {
        add: add.map(|v| string_list(key, v)).transpose()?.unwrap_or_default(),
        remove: remove
            .map(|v| string_list(key, v))
            .transpose()?
            .unwrap_or_default(),
    })
}

fn parse_history(value: &Value) -> Result<HistoryOp, PatchError> {
    let key = PatchField::SceneHistory.key();
    if value.is_array() {
        return Ok(HistoryOp::Extend(string_list(key, value)?));
    }
    value
        .as_object()
        .filter(|obj| obj.len() == 1)
        .and_then(|obj| operator(obj, "push"))
        .map(|item| string(key, item).map(HistoryOp::Push))
        .unwrap_or_else(|| Err(malformed(key, "expected a list or {push: item}")))
}

/// A parsed patch: at most one operation per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Patch {
    ops: BTreeMap<PatchField, PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a patch document. Unknown fields and mismatched shapes are
    /// rejected as a whole.
    pub fn from_map(doc: &Map<String, Value>) -> Result<Self, PatchError> {
        let mut ops = BTreeMap::new();
        for (key, value) in doc {
            let field =
                PatchField::from_key(key).ok_or_else(|| malformed(key, "field is not patchable"))?;
            ops.insert(field, PatchOp::parse(field, value)?);
        }
        Ok(Self { ops })
    }

    pub fn from_value(doc: &Value) -> Result<Self, PatchError> {
        let obj = doc
            .as_object()
            .ok_or_else(|| malformed("<root>", "a patch must be an object"))?;
        Self::from_map(obj)
    }

    /// Add an operation, replacing any existing one for the same field.
    pub fn with(mut self, op: PatchOp) -> Self {
        self.ops.insert(op.field(), op);
        self
    }

    /// `{scene: {current_scene: scene_id}}`.
    pub fn goto(scene_id: &str) -> Self {
        let mut entries = Map::new();
        entries.insert(
            "current_scene".to_string(),
            Value::String(scene_id.to_string()),
        );
        Self::new().with(PatchOp::Merge(MergeTarget::Scene, entries))
    }

    /// Field-level override: operations in `other` replace this patch's
    /// operations on the same field.
    pub fn merge(&mut self, other: Patch) {
        self.ops.extend(other.ops);
    }

    pub fn get(&self, field: PatchField) -> Option<&PatchOp> {
        self.ops.get(&field)
    }

    pub fn touches(&self, field: PatchField) -> bool {
        self.ops.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> impl Iterator<Item = &PatchOp> {
        self.ops.values()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.ops
                .iter()
                .map(|(field, op)| (field.key().to_string(), op.to_value()))
                .collect(),
        )
    }
}

impl TryFrom<Value> for Patch {
    type Error = PatchError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

impl From<Patch> for Value {
    fn from(patch: Patch) -> Self {
        patch.to_value()
    }
}

/// Wall-clock source for `updated_at`.
pub type Clock = fn() -> DateTime<Utc>;

pub fn system_clock() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Applies patches and maintains the derived flags.
#[derive(Debug, Clone)]
pub struct PatchEngine {
    limits: TurnLimits,
    clock: Clock,
}

impl Default for PatchEngine {
    fn default() -> Self {
        Self::new(TurnLimits::default())
    }
}

impl PatchEngine {
    pub fn new(limits: TurnLimits) -> Self {
        Self {
            limits,
            clock: system_clock,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn limits(&self) -> &TurnLimits {
        &self.limits
    }

    /// Apply `patch` to a copy of `state`.
    ///
    /// Stamps `updated_at`, recomputes the derived flags, and returns the
    /// flags sorted.
    pub fn apply(&self, state: &GameState, patch: &Patch) -> GameState {
        let mut next = state.clone();
        for op in patch.ops() {
            apply_op(&mut next, op);
        }
        next.updated_at = Some((self.clock)());

        let touched_allies = patch.touches(PatchField::Allies);
        let touched_flags = patch.touches(PatchField::Flags);
        next.flags = derived::derive_flags(&next, touched_allies, touched_flags, &self.limits);
        next
    }

    /// Parse and apply a raw patch document in one step.
    pub fn apply_value(&self, state: &GameState, doc: &Value) -> Result<GameState, PatchError> {
        let patch = Patch::from_value(doc)?;
        Ok(self.apply(state, &patch))
    }
}

fn apply_op(state: &mut GameState, op: &PatchOp) {
    match op {
        PatchOp::Counter(counter, op) => {
            let slot = match counter {
                Counter::Turn => &mut state.turn,
                Counter::TotalTurnsUsed => &mut state.total_turns_used,
            };
            *slot = op.apply(*slot, u32::MAX);
        }
        PatchOp::Tally(tally, entries) => {
            let (map, max) = match tally {
                Tally::CharacterTurnsUsed => (&mut state.character_turns_used, u32::MAX),
                Tally::Affinity => (&mut state.affinity, AFFINITY_MAX),
            };
            for (character, op) in entries {
                let current = map.get(character).copied().unwrap_or(0);
                map.insert(character.clone(), op.apply(current, max));
            }
        }
        PatchOp::Allies(entries) => {
            for (character, recruited) in entries {
                state.allies.insert(character.clone(), *recruited);
            }
        }
        PatchOp::Flags(FlagsOp::Replace(flags)) => state.flags = flags.clone(),
        PatchOp::Flags(FlagsOp::Edit { add, remove }) => {
            for flag in add {
                if !state.flags.contains(flag) {
                    state.flags.push(flag.clone());
                }
            }
            state.flags.retain(|f| !remove.contains(f));
        }
        PatchOp::Merge(MergeTarget::Scene, entries) => {
            for (key, value) in entries {
                if key == "current_scene" {
                    state.scene.current_scene = value.as_str().map(str::to_string);
                } else {
                    state.scene.locals.insert(key.clone(), value.clone());
                }
            }
        }
        PatchOp::Merge(MergeTarget::DialogueRules, entries) => {
            for (key, value) in entries {
                state.dialogue_rules.insert(key.clone(), value.clone());
            }
        }
        PatchOp::Append(HistoryOp::Extend(items)) => {
            state.scene_history.extend(items.iter().cloned())
        }
        PatchOp::Append(HistoryOp::Push(item)) => state.scene_history.push(item.clone()),
        PatchOp::Overwrite(scalar, value) => match scalar {
            Scalar::Route => state.route = value.clone(),
            Scalar::Ending => state.ending = value.clone(),
            Scalar::UserChoice => state.user_choice = value.clone(),
            Scalar::LastUserMsg => state.last_user_msg = value.clone().unwrap_or_default(),
        },
        PatchOp::Sticky(proposed) => {
            let held = state.end_reason.as_deref().is_some_and(|r| !r.is_empty());
            if let Some(reason) = proposed.as_deref().filter(|r| !r.is_empty()) {
                if !held {
                    state.end_reason = Some(reason.to_string());
                }
            }
        }
    }
}
