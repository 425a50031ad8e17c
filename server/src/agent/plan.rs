//! Agent write plan — tool execution against a merged board view.
//!
//! DESIGN
//! ======
//! Tool calls never commit individual writes. Each call is executed against
//! the plan: a merged view of the board snapshot plus everything planned so
//! far, a known-id set `K`, and the pending write list. The known-id set is
//! what keeps the model honest — a modification referencing an id outside
//! `K` produces an error result string and no write, so the model can
//! correct itself on its next turn. Creates grow `K`; deletes shrink it.
//!
//! Every tool returns a human-readable result string that becomes the
//! tool_result content. Create tools return the assigned id.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::json;

use crate::clock;
use crate::model::{self, Fields, ObjectType};
use crate::store::{BoardId, Collection, Write, WriteMode, WriteOp};

const DEFAULT_STICKY_SIZE: f64 = 200.0;
const DEFAULT_STICKY_COLOR: &str = "#FFEB3B";
const DEFAULT_SHAPE_COLOR: &str = "#4CAF50";
const DEFAULT_FONT_SIZE: f64 = 14.0;
const DEFAULT_FRAME_WIDTH: f64 = 400.0;
const DEFAULT_FRAME_HEIGHT: f64 = 300.0;
const DEFAULT_RADIUS: f64 = 50.0;

// =============================================================================
// TYPES
// =============================================================================

/// One executed tool call, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    pub tool: String,
    pub input: serde_json::Value,
    #[serde(rename = "objectId", skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
enum PlannedWrite {
    Create { id: String, fields: Fields },
    Merge { id: String, fields: Fields },
    Delete { id: String },
}

/// Result of one tool execution: the tool_result string and whether it was
/// an error.
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

/// The pending write plan for one agent invocation.
pub struct Plan {
    board_id: BoardId,
    user_id: String,
    known_ids: HashSet<String>,
    /// Snapshot ∪ pending writes; what the model and the auto-fit pass see.
    merged: HashMap<String, Fields>,
    writes: Vec<PlannedWrite>,
    actions: Vec<PlannedAction>,
}

impl Plan {
    #[must_use]
    pub fn new(board_id: BoardId, user_id: &str, snapshot: Vec<(String, Fields)>) -> Self {
        let known_ids = snapshot.iter().map(|(id, _)| id.clone()).collect();
        let merged = snapshot.into_iter().collect();
        Self {
            board_id,
            user_id: user_id.to_owned(),
            known_ids,
            merged,
            writes: Vec::new(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    #[must_use]
    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    /// The merged board view, for the auto-fit pass.
    pub(crate) fn merged_mut(&mut self) -> &mut HashMap<String, Fields> {
        &mut self.merged
    }

    /// Append an auto-fit frame patch produced after tool execution.
    pub(crate) fn push_autofit_patch(&mut self, frame_id: String, patch: Fields) {
        self.writes.push(PlannedWrite::Merge { id: frame_id, fields: patch });
    }

    /// Convert the plan into one store batch.
    #[must_use]
    pub fn into_batch(self) -> (Vec<Write>, Vec<PlannedAction>) {
        let board_id = self.board_id;
        let writes = self
            .writes
            .into_iter()
            .map(|w| match w {
                PlannedWrite::Create { id, fields } => Write {
                    board_id,
                    collection: Collection::Objects,
                    doc_id: id,
                    op: WriteOp::Put { fields, mode: WriteMode::Create },
                },
                PlannedWrite::Merge { id, fields } => Write {
                    board_id,
                    collection: Collection::Objects,
                    doc_id: id,
                    op: WriteOp::Put { fields, mode: WriteMode::Merge },
                },
                PlannedWrite::Delete { id } => {
                    Write { board_id, collection: Collection::Objects, doc_id: id, op: WriteOp::Delete }
                }
            })
            .collect();
        (writes, self.actions)
    }
}

// =============================================================================
// TOOL EXECUTION
// =============================================================================

impl Plan {
    /// Execute one tool call against the plan.
    pub fn execute_tool(&mut self, tool: &str, input: &serde_json::Value) -> ToolOutcome {
        let result = match tool {
            "createStickyNote" => self.create_sticky(input),
            "createText" => self.create_text(input),
            "createShape" => self.create_shape(input),
            "createFrame" => self.create_frame(input),
            "createConnector" => self.create_connector(input),
            "moveObject" => self.move_object(input),
            "resizeObject" => self.resize_object(input),
            "updateText" => self.update_text(input),
            "changeColor" => self.change_color(input),
            "updateConnectorStyle" => self.update_connector_style(input),
            "deleteObject" => self.delete_object(input),
            "getBoardState" => Ok((self.board_summary(), None)),
            _ => Err(format!("unknown tool: {tool}")),
        };

        match result {
            Ok((content, object_id)) => {
                self.actions.push(PlannedAction {
                    tool: tool.to_owned(),
                    input: input.clone(),
                    object_id,
                    error: None,
                });
                ToolOutcome { content, is_error: false }
            }
            Err(message) => {
                self.actions.push(PlannedAction {
                    tool: tool.to_owned(),
                    input: input.clone(),
                    object_id: None,
                    error: Some(message.clone()),
                });
                ToolOutcome { content: format!("error: {message}"), is_error: true }
            }
        }
    }

    fn stage_create(&mut self, mut fields: Fields) -> Result<String, String> {
        fields.insert(model::F_LAST_EDITED_BY.into(), json!(self.user_id));
        fields.entry(model::F_ROTATION.to_owned()).or_insert(json!(0.0));
        fields.entry(model::F_Z_INDEX.to_owned()).or_insert(json!(0));
        // The same validation gate interactive creates go through.
        {
            let mut check = fields.clone();
            check.remove(model::F_LAST_EDITED_BY);
            model::validate_create(&check).map_err(|e| e.to_string())?;
        }

        let id = clock::new_object_id();
        self.known_ids.insert(id.clone());
        self.merged.insert(id.clone(), fields.clone());
        self.writes.push(PlannedWrite::Create { id: id.clone(), fields });
        Ok(id)
    }

    fn stage_merge(&mut self, id: &str, mut patch: Fields) -> Result<(), String> {
        model::validate_patch(&patch).map_err(|e| e.to_string())?;
        patch.insert(model::F_LAST_EDITED_BY.into(), json!(self.user_id));
        if let Some(fields) = self.merged.get_mut(id) {
            for (key, value) in &patch {
                fields.insert(key.clone(), value.clone());
            }
        }
        self.writes.push(PlannedWrite::Merge { id: id.to_owned(), fields: patch });
        Ok(())
    }

    /// The known-id guard. Every modification passes through here.
    fn require_known(&self, input: &serde_json::Value, key: &str) -> Result<String, String> {
        let id = input
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("missing {key}"))?;
        if !self.known_ids.contains(id) {
            return Err(format!("unknown object id: {id} — use getBoardState or an id returned by a create tool"));
        }
        Ok(id.to_owned())
    }

    // =========================================================================
    // creates
    // =========================================================================

    fn create_sticky(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let fields: Fields = [
            (model::F_TYPE.to_owned(), json!("sticky")),
            (model::F_TEXT.to_owned(), json!(str_arg(input, "text").unwrap_or_default())),
            (model::F_X.to_owned(), json!(num_arg(input, "x").unwrap_or(0.0))),
            (model::F_Y.to_owned(), json!(num_arg(input, "y").unwrap_or(0.0))),
            (model::F_WIDTH.to_owned(), json!(DEFAULT_STICKY_SIZE)),
            (model::F_HEIGHT.to_owned(), json!(DEFAULT_STICKY_SIZE)),
            (
                model::F_COLOR.to_owned(),
                json!(str_arg(input, "color").unwrap_or(DEFAULT_STICKY_COLOR)),
            ),
        ]
        .into_iter()
        .collect();
        let id = self.stage_create(fields)?;
        Ok((format!("created sticky note {id}"), Some(id)))
    }

    fn create_text(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let fields: Fields = [
            (model::F_TYPE.to_owned(), json!("text")),
            (model::F_TEXT.to_owned(), json!(str_arg(input, "text").unwrap_or_default())),
            (model::F_X.to_owned(), json!(num_arg(input, "x").unwrap_or(0.0))),
            (model::F_Y.to_owned(), json!(num_arg(input, "y").unwrap_or(0.0))),
            (model::F_WIDTH.to_owned(), json!(DEFAULT_STICKY_SIZE)),
            (model::F_HEIGHT.to_owned(), json!(40.0)),
            (
                model::F_FONT_SIZE.to_owned(),
                json!(num_arg(input, "fontSize").unwrap_or(DEFAULT_FONT_SIZE)),
            ),
        ]
        .into_iter()
        .collect();
        let id = self.stage_create(fields)?;
        Ok((format!("created text {id}"), Some(id)))
    }

    fn create_shape(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let shape = str_arg(input, "type").unwrap_or("rectangle");
        let x = num_arg(input, "x").unwrap_or(0.0);
        let y = num_arg(input, "y").unwrap_or(0.0);
        let color = str_arg(input, "color").unwrap_or(DEFAULT_SHAPE_COLOR);

        let mut fields: Fields = [
            (model::F_TYPE.to_owned(), json!(shape)),
            (model::F_X.to_owned(), json!(x)),
            (model::F_Y.to_owned(), json!(y)),
            (model::F_COLOR.to_owned(), json!(color)),
        ]
        .into_iter()
        .collect();

        match shape {
            "rectangle" => {
                fields.insert(model::F_WIDTH.into(), json!(num_arg(input, "width").unwrap_or(200.0)));
                fields.insert(model::F_HEIGHT.into(), json!(num_arg(input, "height").unwrap_or(100.0)));
            }
            "circle" => {
                fields.insert(model::F_RADIUS.into(), json!(num_arg(input, "radius").unwrap_or(DEFAULT_RADIUS)));
            }
            "line" => {
                let points = input
                    .get("points")
                    .cloned()
                    .unwrap_or_else(|| json!([0.0, 0.0, 100.0, 0.0]));
                fields.insert(model::F_POINTS.into(), points);
            }
            other => return Err(format!("unsupported shape type: {other}")),
        }

        let id = self.stage_create(fields)?;
        Ok((format!("created {shape} {id}"), Some(id)))
    }

    fn create_frame(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let title = str_arg(input, "title").unwrap_or("Untitled");
        let fields: Fields = [
            (model::F_TYPE.to_owned(), json!("frame")),
            (model::F_TEXT.to_owned(), json!(title)),
            (model::F_X.to_owned(), json!(num_arg(input, "x").unwrap_or(0.0))),
            (model::F_Y.to_owned(), json!(num_arg(input, "y").unwrap_or(0.0))),
            (
                model::F_WIDTH.to_owned(),
                json!(num_arg(input, "width").unwrap_or(DEFAULT_FRAME_WIDTH)),
            ),
            (
                model::F_HEIGHT.to_owned(),
                json!(num_arg(input, "height").unwrap_or(DEFAULT_FRAME_HEIGHT)),
            ),
        ]
        .into_iter()
        .collect();
        let id = self.stage_create(fields)?;
        Ok((format!("created frame \"{title}\" {id}"), Some(id)))
    }

    fn create_connector(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let from = self.require_known(input, "fromId")?;
        let to = self.require_known(input, "toId")?;

        let style = input.get("style").and_then(|v| v.as_object());
        let line_style = style
            .and_then(|s| s.get(model::F_LINE_STYLE))
            .and_then(|v| v.as_str())
            .unwrap_or("solid");
        let arrow_head = style
            .and_then(|s| s.get(model::F_ARROW_HEAD))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);

        let fields: Fields = [
            (model::F_TYPE.to_owned(), json!("connector")),
            (model::F_X.to_owned(), json!(0.0)),
            (model::F_Y.to_owned(), json!(0.0)),
            (model::F_WIDTH.to_owned(), json!(0.0)),
            (model::F_HEIGHT.to_owned(), json!(0.0)),
            (model::F_CONNECTED_FROM.to_owned(), json!(from)),
            (model::F_CONNECTED_TO.to_owned(), json!(to)),
            (
                model::F_STYLE.to_owned(),
                json!({ "lineStyle": line_style, "arrowHead": arrow_head }),
            ),
        ]
        .into_iter()
        .collect();
        let id = self.stage_create(fields)?;
        Ok((format!("created connector {id} from {from} to {to}"), Some(id)))
    }

    // =========================================================================
    // modifications
    // =========================================================================

    fn move_object(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let id = self.require_known(input, "objectId")?;
        let mut patch = Fields::new();
        if let Some(x) = num_arg(input, "x") {
            patch.insert(model::F_X.into(), json!(x));
        }
        if let Some(y) = num_arg(input, "y") {
            patch.insert(model::F_Y.into(), json!(y));
        }
        if patch.is_empty() {
            return Err("moveObject requires x or y".into());
        }
        self.stage_merge(&id, patch)?;
        Ok((format!("moved object {id}"), Some(id)))
    }

    fn resize_object(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let id = self.require_known(input, "objectId")?;
        let mut patch = Fields::new();
        for key in ["width", "height", "radius"] {
            if let Some(v) = num_arg(input, key) {
                patch.insert(key.to_owned(), json!(v));
            }
        }
        if patch.is_empty() {
            return Err("resizeObject requires width, height, or radius".into());
        }
        if patch.contains_key(model::F_RADIUS)
            && self.merged.get(&id).and_then(|f| model::object_type_of(f)) != Some(ObjectType::Circle)
        {
            return Err("radius only applies to circles".into());
        }
        self.stage_merge(&id, patch)?;
        Ok((format!("resized object {id}"), Some(id)))
    }

    fn update_text(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let id = self.require_known(input, "objectId")?;
        let text = str_arg(input, "newText").ok_or("missing newText")?;
        let patch: Fields = [(model::F_TEXT.to_owned(), json!(text))].into_iter().collect();
        self.stage_merge(&id, patch)?;
        Ok((format!("updated text on {id}"), Some(id)))
    }

    fn change_color(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let id = self.require_known(input, "objectId")?;
        let color = str_arg(input, "color").ok_or("missing color")?;
        let patch: Fields = [(model::F_COLOR.to_owned(), json!(color))].into_iter().collect();
        self.stage_merge(&id, patch)?;
        Ok((format!("changed color of {id} to {color}"), Some(id)))
    }

    fn update_connector_style(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let id = self.require_known(input, "objectId")?;
        let current = self.merged.get(&id).ok_or("connector not on board")?;
        if model::object_type_of(current) != Some(ObjectType::Connector) {
            return Err(format!("{id} is not a connector"));
        }

        // Style is one stored field; merge the provided keys over the current
        // value so an arrow-head toggle keeps the line style.
        let mut style = current
            .get(model::F_STYLE)
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        if let Some(line_style) = str_arg(input, "lineStyle") {
            style.insert(model::F_LINE_STYLE.into(), json!(line_style));
        }
        if let Some(arrow) = input.get("arrowHead").and_then(serde_json::Value::as_bool) {
            style.insert(model::F_ARROW_HEAD.into(), json!(arrow));
        }

        let patch: Fields = [(model::F_STYLE.to_owned(), serde_json::Value::Object(style))]
            .into_iter()
            .collect();
        self.stage_merge(&id, patch)?;
        Ok((format!("updated connector style on {id}"), Some(id)))
    }

    fn delete_object(&mut self, input: &serde_json::Value) -> Result<(String, Option<String>), String> {
        let id = self.require_known(input, "objectId")?;
        self.known_ids.remove(&id);
        self.merged.remove(&id);
        self.writes.push(PlannedWrite::Delete { id: id.clone() });
        Ok((format!("deleted object {id}"), Some(id)))
    }

    // =========================================================================
    // inspection
    // =========================================================================

    fn board_summary(&self) -> String {
        let objects: Vec<serde_json::Value> = self
            .merged
            .iter()
            .map(|(id, fields)| {
                json!({
                    "id": id,
                    "type": fields.get(model::F_TYPE),
                    "x": fields.get(model::F_X),
                    "y": fields.get(model::F_Y),
                    "width": fields.get(model::F_WIDTH),
                    "height": fields.get(model::F_HEIGHT),
                    "radius": fields.get(model::F_RADIUS),
                    "text": fields.get(model::F_TEXT),
                    "color": fields.get(model::F_COLOR),
                    "connectedFrom": fields.get(model::F_CONNECTED_FROM),
                    "connectedTo": fields.get(model::F_CONNECTED_TO),
                })
            })
            .collect();
        json!({ "objects": objects, "count": objects.len() }).to_string()
    }
}

fn num_arg(input: &serde_json::Value, key: &str) -> Option<f64> {
    input.get(key).and_then(serde_json::Value::as_f64)
}

fn str_arg<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
