//! The operations shipped with the bridge.
//!
//! Three run inside the bridge (`browser_wait`, `bridge_ping`, `bridge_info`);
//! everything else is forwarded to the browser extension by name.

use crate::{
    descriptor::{Catalog, OperationDescriptor},
    error::Result,
    schema::{FieldSchema, InputSchema},
};

pub const MAX_WAIT_MS: f64 = 60_000.0;
const URL_PATTERN: &str = r"^(https?://|about:|file://)";

impl Catalog {
    /// The default catalog served to clients.
    pub fn builtin() -> Result<Self> {
        Self::new(builtin_operations())
    }
}

fn selector() -> FieldSchema {
    FieldSchema::string("CSS selector of the target element").min_len(1)
}

fn tab_id(description: &str) -> FieldSchema {
    FieldSchema::integer(description).min(0.0)
}

pub fn builtin_operations() -> Vec<OperationDescriptor> {
    use OperationDescriptor as Op;

    vec![
        Op::local(
            "browser_wait",
            "Pause for the given number of milliseconds before continuing.",
            InputSchema::new().required(
                "durationMs",
                FieldSchema::integer("How long to wait, in milliseconds").range(0.0, MAX_WAIT_MS),
            ),
        ),
        Op::local(
            "bridge_ping",
            "Check that the bridge is responsive. Echoes the optional message.",
            InputSchema::new().optional("message", FieldSchema::string("Text to echo back").max_len(1024)),
        ),
        Op::local(
            "bridge_info",
            "Describe the bridge: version, uptime and whether a browser is connected.",
            InputSchema::new(),
        ),
        Op::delegated(
            "browser_navigate",
            "Navigate the active tab to a URL.",
            InputSchema::new().required(
                "url",
                FieldSchema::string("Absolute http(s), about: or file:// URL").pattern(URL_PATTERN),
            ),
        ),
        Op::delegated("browser_go_back", "Go back in the active tab's history.", InputSchema::new()),
        Op::delegated(
            "browser_go_forward",
            "Go forward in the active tab's history.",
            InputSchema::new(),
        ),
        Op::delegated("browser_reload", "Reload the active tab.", InputSchema::new()),
        Op::delegated(
            "browser_click",
            "Click the element matching a CSS selector.",
            InputSchema::new().required("selector", selector()),
        ),
        Op::delegated(
            "browser_hover",
            "Move the pointer over the element matching a CSS selector.",
            InputSchema::new().required("selector", selector()),
        ),
        Op::delegated(
            "browser_type",
            "Type text into an editable element, optionally submitting its form.",
            InputSchema::new()
                .required("selector", selector())
                .required("text", FieldSchema::string("Text to type"))
                .optional("submit", FieldSchema::boolean("Press Enter after typing")),
        ),
        Op::delegated(
            "browser_press_key",
            "Press a keyboard key in the active tab, e.g. `Enter` or `ArrowDown`.",
            InputSchema::new().required("key", FieldSchema::string("Key name").min_len(1)),
        ),
        Op::delegated(
            "browser_select_option",
            "Select one or more options in a `<select>` element.",
            InputSchema::new()
                .required("selector", selector())
                .required("values", FieldSchema::array("Option values to select").min_len(1)),
        ),
        Op::delegated(
            "browser_scroll",
            "Scroll the page by the given offsets in pixels.",
            InputSchema::new()
                .optional("x", FieldSchema::integer("Horizontal offset"))
                .optional("y", FieldSchema::integer("Vertical offset")),
        ),
        Op::delegated(
            "browser_snapshot",
            "Capture an accessibility snapshot of the active tab.",
            InputSchema::new(),
        ),
        Op::delegated(
            "browser_screenshot",
            "Capture a screenshot of the active tab.",
            InputSchema::new()
                .optional("format", FieldSchema::string("Image format").one_of(["png", "jpeg"]))
                .optional("quality", FieldSchema::integer("JPEG quality").range(1.0, 100.0))
                .optional("fullPage", FieldSchema::boolean("Capture the full scrollable page")),
        ),
        Op::delegated(
            "browser_get_text",
            "Return the visible text of the page or of one element.",
            InputSchema::new().optional("selector", selector()),
        ),
        Op::delegated(
            "browser_evaluate",
            "Evaluate a JavaScript expression in the page and return its result.",
            InputSchema::new().required(
                "expression",
                FieldSchema::string("JavaScript expression").length(1, 100_000),
            ),
        ),
        Op::delegated(
            "browser_console_logs",
            "Return console messages collected from the active tab.",
            InputSchema::new(),
        ),
        Op::delegated("browser_list_tabs", "List open tabs.", InputSchema::new()),
        Op::delegated(
            "browser_switch_tab",
            "Activate the tab with the given id.",
            InputSchema::new().required("tabId", tab_id("Tab id from browser_list_tabs")),
        ),
        Op::delegated(
            "browser_new_tab",
            "Open a new tab, optionally at a URL.",
            InputSchema::new().optional("url", FieldSchema::string("URL to open").pattern(URL_PATTERN)),
        ),
        Op::delegated(
            "browser_close_tab",
            "Close a tab. Defaults to the active tab.",
            InputSchema::new().optional("tabId", tab_id("Tab id to close")),
        ),
    ]
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{ExecutionKind, ValidationError},
        rstest::rstest,
        serde_json::{Value, json},
    };

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    #[test]
    fn every_descriptor_is_reachable_under_its_own_name() {
        let catalog = catalog();
        for op in catalog.list() {
            assert_eq!(catalog.get(&op.name).unwrap().name, op.name);
        }
        assert_eq!(catalog.len(), builtin_operations().len());
    }

    #[test]
    fn locality_is_a_descriptor_property() {
        let catalog = catalog();
        let local: Vec<&str> = catalog
            .list()
            .iter()
            .filter(|op| op.execution == ExecutionKind::Local)
            .map(|op| op.name.as_str())
            .collect();
        assert_eq!(local, ["browser_wait", "bridge_ping", "bridge_info"]);
    }

    #[test]
    fn listing_is_stable_across_calls() {
        let catalog = catalog();
        assert_eq!(catalog.tool_defs(), catalog.tool_defs());
        assert_eq!(
            serde_json::to_value(catalog.tool_defs()).unwrap(),
            serde_json::to_value(Catalog::builtin().unwrap().tool_defs()).unwrap()
        );
    }

    #[test]
    fn unknown_operation_is_reported() {
        let err = catalog().validate("browser_teleport", &json!({})).unwrap_err();
        assert_eq!(err, ValidationError::UnknownOperation("browser_teleport".into()));
    }

    #[test]
    fn every_required_field_is_enforced() {
        let catalog = catalog();
        for op in catalog.list() {
            let required: Vec<&str> = op.input.required_names().collect();
            for missing in &required {
                let args: serde_json::Map<String, Value> = required
                    .iter()
                    .filter(|name| *name != missing)
                    .map(|name| ((*name).to_string(), json!("placeholder")))
                    .collect();
                let err = catalog.validate(&op.name, &Value::Object(args)).unwrap_err();
                assert_eq!(
                    err,
                    ValidationError::MissingField {
                        field: (*missing).to_string()
                    },
                    "operation {}",
                    op.name
                );
            }
        }
    }

    #[rstest]
    #[case(json!(0), true)]
    #[case(json!(60_000), true)]
    #[case(json!(-1), false)]
    #[case(json!(60_001), false)]
    #[case(json!(250.0), true)]
    fn wait_bounds_are_inclusive(#[case] duration: Value, #[case] ok: bool) {
        let catalog = catalog();
        let result = catalog.validate("browser_wait", &json!({ "durationMs": duration }));
        assert_eq!(result.is_ok(), ok, "{result:?}");
        if !ok {
            assert!(matches!(result, Err(ValidationError::OutOfRange { .. })));
        }
    }

    #[rstest]
    #[case(1, true)]
    #[case(100, true)]
    #[case(0, false)]
    #[case(101, false)]
    fn screenshot_quality_bounds(#[case] quality: i64, #[case] ok: bool) {
        let catalog = catalog();
        let result = catalog.validate("browser_screenshot", &json!({ "quality": quality }));
        assert_eq!(result.is_ok(), ok);
    }

    #[test]
    fn integers_reject_fractions_and_strings() {
        let catalog = catalog();
        let err = catalog
            .validate("browser_wait", &json!({"durationMs": 1.5}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { ref field, .. } if field == "durationMs"));
        let err = catalog
            .validate("browser_switch_tab", &json!({"tabId": "3"}))
            .unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
        assert_eq!(
            err.to_string(),
            "field 'tabId' must be an integer, got a string"
        );
    }

    #[test]
    fn tab_ids_are_non_negative() {
        let catalog = catalog();
        assert!(catalog.validate("browser_switch_tab", &json!({"tabId": 0})).is_ok());
        assert!(matches!(
            catalog.validate("browser_close_tab", &json!({"tabId": -1})),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[rstest]
    #[case("https://example.com", true)]
    #[case("http://localhost:3000/x", true)]
    #[case("about:blank", true)]
    #[case("file:///tmp/a.html", true)]
    #[case("javascript:alert(1)", false)]
    #[case("example.com", false)]
    fn navigate_url_pattern(#[case] url: &str, #[case] ok: bool) {
        let catalog = catalog();
        let result = catalog.validate("browser_navigate", &json!({ "url": url }));
        assert_eq!(result.is_ok(), ok, "{url}");
        if !ok {
            assert_eq!(result.unwrap_err().kind(), "pattern_mismatch");
        }
    }

    #[test]
    fn screenshot_format_is_an_enum() {
        let catalog = catalog();
        assert!(catalog.validate("browser_screenshot", &json!({"format": "jpeg"})).is_ok());
        let err = catalog
            .validate("browser_screenshot", &json!({"format": "gif"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::EnumViolation { .. }));
    }

    #[test]
    fn string_lengths_are_checked() {
        let catalog = catalog();
        let err = catalog
            .validate("browser_evaluate", &json!({"expression": ""}))
            .unwrap_err();
        assert_eq!(err.kind(), "length_out_of_range");
        let long = "x".repeat(1025);
        assert!(catalog.validate("bridge_ping", &json!({"message": long})).is_err());
        assert!(catalog.validate("bridge_ping", &json!({"message": "x".repeat(1024)})).is_ok());
    }

    #[test]
    fn arrays_need_at_least_one_value() {
        let catalog = catalog();
        let args = json!({"selector": "#size", "values": []});
        assert_eq!(
            catalog.validate("browser_select_option", &args).unwrap_err().kind(),
            "length_out_of_range"
        );
        let args = json!({"selector": "#size", "values": ["m"]});
        assert!(catalog.validate("browser_select_option", &args).is_ok());
    }

    #[test]
    fn extra_fields_and_null_arguments_are_accepted() {
        let catalog = catalog();
        assert!(
            catalog
                .validate("browser_click", &json!({"selector": "a", "button": "left"}))
                .is_ok()
        );
        assert!(catalog.validate("browser_reload", &Value::Null).is_ok());
        assert!(catalog.validate("browser_scroll", &json!({"x": null})).is_ok());
    }

    #[test]
    fn non_object_arguments_are_refused() {
        let err = catalog().validate("browser_reload", &json!([1, 2])).unwrap_err();
        assert_eq!(err, ValidationError::NotAnObject { actual: "an array" });
    }

    #[test]
    fn required_null_counts_as_missing() {
        let err = catalog()
            .validate("browser_click", &json!({"selector": null}))
            .unwrap_err();
        assert_eq!(err.kind(), "missing_field");
    }
}
