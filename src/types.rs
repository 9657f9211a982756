//! Board and element model shared by the engine, the store adapters and the CLI.
//!
//! DESIGN
//! ======
//! Element rows travel as `ElementRow`: the storage shape, flat columns plus
//! an untyped `data` document. `BoardElement` is the typed projection with
//! `data` decoded into `ElementData` according to the row's `type`. Decoding
//! happens at the adapter boundary so the engine only handles typed elements.
//!
//! Partial updates (`ElementPatch`) carry two independent field groups,
//! position and data. Applying a data patch overwrites only the fields it
//! names; sibling fields keep whatever value they already had.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Author value of every element the instructor creates.
pub const INSTRUCTOR_AUTHOR: &str = "formatore";

pub const DEFAULT_BOARD_TITLE: &str = "Nuova Bacheca";
pub const DEFAULT_QUESTION: &str = "Nuova domanda";
pub const DEFAULT_LINK_TITLE: &str = "Nuovo link";
pub const DEFAULT_POST_IT_COLOR: &str = "yellow";

/// Colors a sticky note may take.
pub const POST_IT_COLORS: [&str; 5] = ["yellow", "pink", "green", "blue", "orange"];

pub const MIN_POLL_OPTIONS: usize = 2;
pub const MAX_POLL_OPTIONS: usize = 8;
pub const MAX_NICKNAME_CHARS: usize = 30;

/// Where new elements land when the caller has no position of its own.
pub const DEFAULT_POSITION: Position = Position { x: 100.0, y: 100.0 };

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// BOARD
// =============================================================================

/// One shared whiteboard with its metadata and participant roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Uuid,
    pub title: String,
    pub created_at: i64,
    pub config: BoardConfig,
    /// Encoded raster of the freehand layer; `None` when the layer is blank.
    pub drawing_data: Option<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Capability flags gating participant actions. Only the instructor changes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardConfig {
    pub allow_post_it: bool,
    pub allow_drawing: bool,
    #[serde(rename = "allowSondaggio")]
    pub allow_poll: bool,
    #[serde(rename = "allowEsercizio")]
    pub allow_exercise: bool,
    pub allow_link: bool,
    pub is_locked: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            allow_post_it: true,
            allow_drawing: false,
            allow_poll: true,
            allow_exercise: true,
            allow_link: false,
            is_locked: false,
        }
    }
}

impl BoardConfig {
    /// Whether participants may create elements of `kind`.
    #[must_use]
    pub fn allows(&self, kind: ElementKind) -> bool {
        match kind {
            ElementKind::PostIt => self.allow_post_it,
            ElementKind::Poll => self.allow_poll,
            ElementKind::Exercise => self.allow_exercise,
            ElementKind::Link => self.allow_link,
        }
    }

    /// True when participants can create at least one element kind.
    #[must_use]
    pub fn allows_any_element(&self) -> bool {
        self.allow_post_it || self.allow_poll || self.allow_exercise || self.allow_link
    }
}

/// Toggle set for `BoardConfig`. Absent flags are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_post_it: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_drawing: Option<bool>,
    #[serde(rename = "allowSondaggio", skip_serializing_if = "Option::is_none")]
    pub allow_poll: Option<bool>,
    #[serde(rename = "allowEsercizio", skip_serializing_if = "Option::is_none")]
    pub allow_exercise: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_link: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
}

impl ConfigPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, config: &mut BoardConfig) {
        if let Some(v) = self.allow_post_it {
            config.allow_post_it = v;
        }
        if let Some(v) = self.allow_drawing {
            config.allow_drawing = v;
        }
        if let Some(v) = self.allow_poll {
            config.allow_poll = v;
        }
        if let Some(v) = self.allow_exercise {
            config.allow_exercise = v;
        }
        if let Some(v) = self.allow_link {
            config.allow_link = v;
        }
        if let Some(v) = self.is_locked {
            config.is_locked = v;
        }
    }
}

/// Fields of a board row the store should create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBoard {
    pub title: String,
    pub config: BoardConfig,
}

impl Default for NewBoard {
    fn default() -> Self {
        Self { title: DEFAULT_BOARD_TITLE.to_owned(), config: BoardConfig::default() }
    }
}

/// Partial board update. `drawing_data: Some(None)` clears the drawing layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardPatch {
    pub title: Option<String>,
    pub config: Option<BoardConfig>,
    pub drawing_data: Option<Option<String>>,
}

impl BoardPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.config.is_none() && self.drawing_data.is_none()
    }

    pub fn apply(&self, board: &mut Board) {
        if let Some(title) = &self.title {
            board.title.clone_from(title);
        }
        if let Some(config) = self.config {
            board.config = config;
        }
        if let Some(drawing) = &self.drawing_data {
            board.drawing_data.clone_from(drawing);
        }
    }
}

/// Roster entry. Nicknames are not unique across people.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub nickname: String,
    pub joined_at: i64,
    pub last_seen: i64,
}

// =============================================================================
// ACTOR
// =============================================================================

/// Who is acting on the board from this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Instructor,
    Participant(String),
}

impl Actor {
    #[must_use]
    pub fn is_instructor(&self) -> bool {
        matches!(self, Self::Instructor)
    }

    /// Value written into `author` for elements this actor creates, and the
    /// key this actor votes and responds under.
    #[must_use]
    pub fn author(&self) -> &str {
        match self {
            Self::Instructor => INSTRUCTOR_AUTHOR,
            Self::Participant(nickname) => nickname,
        }
    }
}

// =============================================================================
// ELEMENT KIND
// =============================================================================

/// Closed set of element kinds. Wire names follow the stored `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    #[serde(rename = "postit")]
    PostIt,
    #[serde(rename = "sondaggio")]
    Poll,
    #[serde(rename = "esercizio")]
    Exercise,
    #[serde(rename = "link")]
    Link,
}

impl ElementKind {
    pub const ALL: [ElementKind; 4] = [Self::PostIt, Self::Poll, Self::Exercise, Self::Link];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostIt => "postit",
            Self::Poll => "sondaggio",
            Self::Exercise => "esercizio",
            Self::Link => "link",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown element type: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ElementKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postit" => Ok(Self::PostIt),
            "sondaggio" => Ok(Self::Poll),
            "esercizio" => Ok(Self::Exercise),
            "link" => Ok(Self::Link),
            other => Err(UnknownKind(other.to_owned())),
        }
    }
}

// =============================================================================
// ELEMENT DATA
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostItData {
    pub text: String,
    pub color: String,
}

impl Default for PostItData {
    fn default() -> Self {
        Self { text: String::new(), color: DEFAULT_POST_IT_COLOR.to_owned() }
    }
}

/// Nickname -> option indices that voter selected.
pub type Votes = BTreeMap<String, BTreeSet<usize>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollData {
    pub question: String,
    pub options: Vec<String>,
    pub multiple_choice: bool,
    pub votes: Votes,
}

impl Default for PollData {
    fn default() -> Self {
        Self {
            question: DEFAULT_QUESTION.to_owned(),
            options: vec!["Opzione 1".to_owned(), "Opzione 2".to_owned()],
            multiple_choice: false,
            votes: Votes::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseResponse {
    pub author: String,
    pub text: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExerciseData {
    pub question: String,
    pub responses: Vec<ExerciseResponse>,
}

impl Default for ExerciseData {
    fn default() -> Self {
        Self { question: DEFAULT_QUESTION.to_owned(), responses: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkData {
    pub url: String,
    pub title: String,
}

impl Default for LinkData {
    fn default() -> Self {
        Self { url: String::new(), title: DEFAULT_LINK_TITLE.to_owned() }
    }
}

/// Typed element payload. The variant is the element's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementData {
    PostIt(PostItData),
    Poll(PollData),
    Exercise(ExerciseData),
    Link(LinkData),
}

impl ElementData {
    /// Payload a freshly added element of `kind` starts with.
    #[must_use]
    pub fn default_for(kind: ElementKind) -> Self {
        match kind {
            ElementKind::PostIt => Self::PostIt(PostItData::default()),
            ElementKind::Poll => Self::Poll(PollData::default()),
            ElementKind::Exercise => Self::Exercise(ExerciseData::default()),
            ElementKind::Link => Self::Link(LinkData::default()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::PostIt(_) => ElementKind::PostIt,
            Self::Poll(_) => ElementKind::Poll,
            Self::Exercise(_) => ElementKind::Exercise,
            Self::Link(_) => ElementKind::Link,
        }
    }

    /// Decode a stored `data` document for an element of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the kind's shape.
    pub fn decode(kind: ElementKind, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ElementKind::PostIt => Self::PostIt(serde_json::from_value(value)?),
            ElementKind::Poll => Self::Poll(serde_json::from_value(value)?),
            ElementKind::Exercise => Self::Exercise(serde_json::from_value(value)?),
            ElementKind::Link => Self::Link(serde_json::from_value(value)?),
        })
    }

    /// Encode into the stored `data` document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::PostIt(d) => serde_json::to_value(d),
            Self::Poll(d) => serde_json::to_value(d),
            Self::Exercise(d) => serde_json::to_value(d),
            Self::Link(d) => serde_json::to_value(d),
        }
    }

    /// Merge the fields named by `patch` into this payload.
    ///
    /// # Errors
    ///
    /// Returns `PatchError::KindMismatch` if the patch targets another kind.
    pub fn apply(&mut self, patch: &DataPatch) -> Result<(), PatchError> {
        match (self, patch) {
            (Self::PostIt(d), DataPatch::PostIt(p)) => {
                merge(&mut d.text, p.text.as_ref());
                merge(&mut d.color, p.color.as_ref());
            }
            (Self::Poll(d), DataPatch::Poll(p)) => {
                merge(&mut d.question, p.question.as_ref());
                merge(&mut d.options, p.options.as_ref());
                merge(&mut d.multiple_choice, p.multiple_choice.as_ref());
                merge(&mut d.votes, p.votes.as_ref());
            }
            (Self::Exercise(d), DataPatch::Exercise(p)) => {
                merge(&mut d.question, p.question.as_ref());
                merge(&mut d.responses, p.responses.as_ref());
            }
            (Self::Link(d), DataPatch::Link(p)) => {
                merge(&mut d.url, p.url.as_ref());
                merge(&mut d.title, p.title.as_ref());
            }
            (current, patch) => {
                return Err(PatchError::KindMismatch { element: current.kind(), patch: patch.kind() });
            }
        }
        Ok(())
    }
}

fn merge<T: Clone>(target: &mut T, incoming: Option<&T>) {
    if let Some(value) = incoming {
        target.clone_from(value);
    }
}

// =============================================================================
// PATCHES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostItPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_choice: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<Votes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExercisePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<ExerciseResponse>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Kind-tagged partial payload; each variant names only the fields it changes.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPatch {
    PostIt(PostItPatch),
    Poll(PollPatch),
    Exercise(ExercisePatch),
    Link(LinkPatch),
}

impl DataPatch {
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::PostIt(_) => ElementKind::PostIt,
            Self::Poll(_) => ElementKind::Poll,
            Self::Exercise(_) => ElementKind::Exercise,
            Self::Link(_) => ElementKind::Link,
        }
    }

    /// Encode as a partial `data` document holding only the patched keys.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::PostIt(p) => serde_json::to_value(p),
            Self::Poll(p) => serde_json::to_value(p),
            Self::Exercise(p) => serde_json::to_value(p),
            Self::Link(p) => serde_json::to_value(p),
        }
    }
}

/// Partial element update over the two independently updatable field groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementPatch {
    pub position: Option<Position>,
    pub data: Option<DataPatch>,
}

impl ElementPatch {
    #[must_use]
    pub fn position(position: Position) -> Self {
        Self { position: Some(position), data: None }
    }

    #[must_use]
    pub fn data(data: DataPatch) -> Self {
        Self { position: None, data: Some(data) }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.data.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("{patch} patch cannot apply to a {element} element")]
    KindMismatch { element: ElementKind, patch: ElementKind },
}

// =============================================================================
// ELEMENTS
// =============================================================================

/// Typed board element as the engine and the UI see it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardElement {
    pub id: Uuid,
    pub board_id: Uuid,
    pub position: Position,
    pub author: String,
    pub created_at: i64,
    pub data: ElementData,
}

impl BoardElement {
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    /// Apply both field groups of `patch`. Nothing changes on error.
    ///
    /// # Errors
    ///
    /// Returns `PatchError::KindMismatch` if the data patch targets another kind.
    pub fn apply_patch(&mut self, patch: &ElementPatch) -> Result<(), PatchError> {
        if let Some(data) = &patch.data {
            self.data.apply(data)?;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        Ok(())
    }

    /// Encode into the storage shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_row(&self) -> Result<ElementRow, serde_json::Error> {
        Ok(ElementRow {
            id: self.id,
            board_id: self.board_id,
            kind: self.kind(),
            position_x: self.position.x,
            position_y: self.position.y,
            author: self.author.clone(),
            created_at: self.created_at,
            data: self.data.encode()?,
        })
    }
}

impl TryFrom<ElementRow> for BoardElement {
    type Error = serde_json::Error;

    fn try_from(row: ElementRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            board_id: row.board_id,
            position: Position { x: row.position_x, y: row.position_y },
            author: row.author,
            created_at: row.created_at,
            data: ElementData::decode(row.kind, row.data)?,
        })
    }
}

/// Storage and change-feed shape of a `board_elements` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRow {
    pub id: Uuid,
    pub board_id: Uuid,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub position_x: f64,
    pub position_y: f64,
    pub author: String,
    pub created_at: i64,
    pub data: serde_json::Value,
}

/// Fields of an element row the store should create. The store assigns
/// `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewElement {
    pub board_id: Uuid,
    pub position: Position,
    pub author: String,
    pub data: ElementData,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
