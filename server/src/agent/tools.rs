//! Tool definitions exposed to the board agent.

use crate::llm::Tool;

/// Build the board agent's tool set.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn agent_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "createStickyNote".into(),
            description: "Create a sticky note on the board.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text content of the sticky note" },
                    "x": { "type": "number", "description": "X position on canvas" },
                    "y": { "type": "number", "description": "Y position on canvas" },
                    "color": { "type": "string", "description": "Background color (hex, e.g. #FFEB3B)" }
                },
                "required": ["text", "x", "y"]
            }),
        },
        Tool {
            name: "createText".into(),
            description: "Create a standalone text label on the board.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text content" },
                    "x": { "type": "number", "description": "X position on canvas" },
                    "y": { "type": "number", "description": "Y position on canvas" },
                    "fontSize": { "type": "number", "description": "Font size in points (default 14)" }
                },
                "required": ["text", "x", "y"]
            }),
        },
        Tool {
            name: "createShape".into(),
            description: "Create a shape (rectangle, circle, or line) on the board.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "type": { "type": "string", "enum": ["rectangle", "circle", "line"], "description": "Shape type" },
                    "x": { "type": "number", "description": "X position (circle: center)" },
                    "y": { "type": "number", "description": "Y position (circle: center)" },
                    "width": { "type": "number", "description": "Width in pixels (rectangle)" },
                    "height": { "type": "number", "description": "Height in pixels (rectangle)" },
                    "radius": { "type": "number", "description": "Radius in pixels (circle)" },
                    "points": {
                        "type": "array",
                        "items": { "type": "number" },
                        "description": "Line endpoints [x0, y0, x1, y1] relative to (x, y)"
                    },
                    "color": { "type": "string", "description": "Fill color (hex)" }
                },
                "required": ["type", "x", "y"]
            }),
        },
        Tool {
            name: "createFrame".into(),
            description: "Create a frame — a titled rectangular region that groups content. Frames \
                          automatically grow to fit the objects placed inside them."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Frame title displayed at the top" },
                    "x": { "type": "number", "description": "X position on canvas" },
                    "y": { "type": "number", "description": "Y position on canvas" },
                    "width": { "type": "number", "description": "Width in pixels (default 400)" },
                    "height": { "type": "number", "description": "Height in pixels (default 300)" }
                },
                "required": ["title", "x", "y"]
            }),
        },
        Tool {
            name: "createConnector".into(),
            description: "Create a connector between two existing objects.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "fromId": { "type": "string", "description": "Source object ID" },
                    "toId": { "type": "string", "description": "Target object ID" },
                    "style": {
                        "type": "object",
                        "description": "Visual style (defaults: solid line, arrow head on)",
                        "properties": {
                            "lineStyle": { "type": "string", "enum": ["solid", "dashed"] },
                            "arrowHead": { "type": "boolean" }
                        }
                    }
                },
                "required": ["fromId", "toId"]
            }),
        },
        Tool {
            name: "moveObject".into(),
            description: "Move an object to a new position.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "objectId": { "type": "string", "description": "ID of the object to move" },
                    "x": { "type": "number", "description": "New X position" },
                    "y": { "type": "number", "description": "New Y position" }
                },
                "required": ["objectId", "x", "y"]
            }),
        },
        Tool {
            name: "resizeObject".into(),
            description: "Resize an object to new dimensions.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "objectId": { "type": "string", "description": "ID of the object to resize" },
                    "width": { "type": "number", "description": "New width in pixels" },
                    "height": { "type": "number", "description": "New height in pixels" },
                    "radius": { "type": "number", "description": "New radius (circles only)" }
                },
                "required": ["objectId"]
            }),
        },
        Tool {
            name: "updateText".into(),
            description: "Update the text content of an object (sticky note, text, frame title).".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "objectId": { "type": "string", "description": "ID of the object to update" },
                    "newText": { "type": "string", "description": "New text content" }
                },
                "required": ["objectId", "newText"]
            }),
        },
        Tool {
            name: "changeColor".into(),
            description: "Change the color of an object.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "objectId": { "type": "string", "description": "ID of the object to recolor" },
                    "color": { "type": "string", "description": "New color (hex, e.g. #FF5722)" }
                },
                "required": ["objectId", "color"]
            }),
        },
        Tool {
            name: "updateConnectorStyle".into(),
            description: "Change a connector's line style or arrow head. Fields left out keep their \
                          current value."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "objectId": { "type": "string", "description": "ID of the connector" },
                    "lineStyle": { "type": "string", "enum": ["solid", "dashed"], "description": "New line style" },
                    "arrowHead": { "type": "boolean", "description": "Whether to draw an arrow head" }
                },
                "required": ["objectId"]
            }),
        },
        Tool {
            name: "deleteObject".into(),
            description: "Delete an object from the board.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "objectId": { "type": "string", "description": "ID of the object to delete" }
                },
                "required": ["objectId"]
            }),
        },
        Tool {
            name: "getBoardState".into(),
            description: "Retrieve the current state of all objects on the board, including changes \
                          already planned in this conversation."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}
