//! OpenAPI (v2) description of the post endpoint, served on the post port.

use serde_json::{Value, json};

/// Where the document is served.
pub const OPENAPI_PATH: &str = "/openapi/v2/swagger.json";

/// The API document.
pub fn document() -> Value {
    json!({
        "swagger": "2.0",
        "info": {
            "title": "TagRelay",
            "description": "Tag-addressed notification relay",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "consumes": ["application/json", "application/bson"],
        "produces": ["application/json"],
        "paths": {
            "/v1/sendnotification": {
                "post": {
                    "operationId": "postSendNotification",
                    "summary": "Send a notification to the listeners",
                    "parameters": [{
                        "in": "body",
                        "name": "Body",
                        "required": true,
                        "schema": {"$ref": "#/definitions/Notification"},
                    }],
                    "responses": {
                        "200": {
                            "description": "A request to send a notification has been successfully received.",
                            "schema": {"$ref": "#/definitions/NotificationIDs"},
                        },
                        "400": {
                            "description": "A request to send a notification is malformed",
                            "schema": {"type": "string"},
                        },
                    },
                },
            },
        },
        "definitions": {
            "Notification": {
                "type": "object",
                "required": ["target"],
                "properties": {
                    "target": {
                        "description": "Attributes a listener must match",
                        "type": "object",
                        "additionalProperties": {"type": "string"},
                    },
                    "notification": {
                        "description": "Opaque payload, delivered with the rest of the message",
                    },
                    "sendSynchronicity": {
                        "description": "Deliver to every listener before responding",
                        "type": "boolean",
                        "default": false,
                    },
                },
            },
            "NotificationIDs": {
                "description": "The IDs of the connections the notification was sent to",
                "type": "array",
                "items": {"type": "integer", "format": "uint64"},
                "example": [1, 2, 3],
            },
        },
    })
}
