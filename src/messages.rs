use serde::{Deserialize, Serialize};

use crate::store::{ChatRow, ShapeRow};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

// Closed set of drawable shapes. Every variant serializes under a "type"
// tag with the camelCase field names the canvas client uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    #[serde(rename_all = "camelCase")]
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    #[serde(rename_all = "camelCase")]
    Circle {
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        counter_clockwise: bool,
    },
    #[serde(rename_all = "camelCase")]
    Ellipse {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
        // the client spells this one with a capital W
        counter_clock_wise: bool,
    },
    Pencil {
        points: Vec<Point>,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Arrow {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    #[serde(rename_all = "camelCase")]
    Text {
        x: f64,
        y: f64,
        text: String,
        font_size: f64,
        font_family: String,
        color: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeUpdate {
    pub id: i64,
    pub shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: i64 },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: i64 },
    #[serde(rename_all = "camelCase")]
    Chat { room_id: i64, message: String },
    #[serde(rename_all = "camelCase")]
    Shapes { room_id: i64, message: Shape },
    #[serde(rename_all = "camelCase")]
    Update { room_id: i64, message: ShapeUpdate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Chat {
        room_id: i64,
        user_id: String,
        message: ChatRow,
    },
    #[serde(rename_all = "camelCase")]
    Shapes {
        room_id: i64,
        user_id: String,
        message: ShapeRow,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        room_id: i64,
        user_id: String,
        message: ShapeRow,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frame_tags_match_the_wire() {
        let frame: ClientFrame =
            serde_json::from_value(json!({ "type": "join-room", "roomId": 42 })).unwrap();
        assert_eq!(frame, ClientFrame::JoinRoom { room_id: 42 });

        let frame: ClientFrame =
            serde_json::from_value(json!({ "type": "leave-room", "roomId": 42 })).unwrap();
        assert_eq!(frame, ClientFrame::LeaveRoom { room_id: 42 });

        let frame: ClientFrame =
            serde_json::from_value(json!({ "type": "chat", "roomId": 7, "message": "hi" }))
                .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Chat {
                room_id: 7,
                message: "hi".to_string()
            }
        );
    }

    #[test]
    fn shape_fields_stay_camel_case() {
        let rect = Shape::Rect {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        let value = serde_json::to_value(&rect).unwrap();
        assert_eq!(
            value,
            json!({ "type": "rect", "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0 })
        );

        let circle: Shape = serde_json::from_value(json!({
            "type": "circle",
            "x": 1.0, "y": 2.0, "radius": 3.0,
            "startAngle": 0.0, "endAngle": 6.28,
            "counterClockwise": false,
        }))
        .unwrap();
        assert!(matches!(circle, Shape::Circle { radius, .. } if radius == 3.0));
    }

    #[test]
    fn ellipse_keeps_the_capital_w_quirk() {
        let ellipse = Shape::Ellipse {
            x: 0.0,
            y: 0.0,
            width: 4.0,
            height: 2.0,
            rotation: 0.0,
            start_angle: 0.0,
            end_angle: 6.28,
            counter_clock_wise: true,
        };
        let value = serde_json::to_value(&ellipse).unwrap();
        assert_eq!(value["counterClockWise"], json!(true));
    }

    #[test]
    fn pencil_round_trips_its_points() {
        let text = r#"{"type":"pencil","points":[{"x":1.0,"y":2.0},{"x":3.0,"y":4.0}]}"#;
        let shape: Shape = serde_json::from_str(text).unwrap();
        match &shape {
            Shape::Pencil { points } => assert_eq!(points.len(), 2),
            other => panic!("expected pencil, got {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_a_parse_error() {
        let result = serde_json::from_value::<ClientFrame>(json!({
            "type": "eraser",
            "roomId": 1,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn update_frame_carries_id_and_full_shape() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "update",
            "roomId": 9,
            "message": {
                "id": 3,
                "shape": { "type": "line", "x1": 0.0, "y1": 0.0, "x2": 5.0, "y2": 5.0 }
            }
        }))
        .unwrap();
        match frame {
            ClientFrame::Update { room_id, message } => {
                assert_eq!(room_id, 9);
                assert_eq!(message.id, 3);
                assert!(matches!(message.shape, Shape::Line { .. }));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }
}
