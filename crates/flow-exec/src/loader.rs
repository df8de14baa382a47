//! Flow document loading.

use std::path::Path;

use crate::errors::FlowError;
use crate::types::Flow;

/// Read and parse a YAML flow document. Structural problems surface as
/// `FlowError::Yaml`; semantic problems are the validator's job.
pub fn load_flow(path: &Path) -> Result<Flow, FlowError> {
    let raw = std::fs::read_to_string(path)?;
    let flow: Flow = serde_yaml::from_str(&raw)?;
    Ok(flow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepAction;
    use std::io::Write;

    const FLOW_YAML: &str = r##"
name: checkout
description: Buy the thing
url_prefix: https://shop.example.com
vision_fallback: true
vision_backend: omniparser
steps:
  - step_no: 1
    action: navigate
    target: /cart
    description: open the cart
  - step_no: 2
    action: click
    target: "#checkout"
    description: press checkout
    timeout_ms: 2000
  - step_no: 3
    action: loop
    target: items
    description: dismiss upsell dialogs
    repeat: 2
    continue_on_error: true
    loop_steps:
      - action: click
        target: ".dismiss"
        description: close one dialog
"##;

    #[test]
    fn loads_a_full_flow_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FLOW_YAML.as_bytes()).unwrap();

        let flow = load_flow(file.path()).unwrap();
        assert_eq!(flow.name, "checkout");
        assert!(flow.vision_fallback);
        assert_eq!(flow.steps.len(), 3);
        assert_eq!(flow.steps[1].timeout_ms, Some(2000));
        assert_eq!(flow.steps[2].action, StepAction::Loop);
        assert_eq!(flow.steps[2].repeat, 2);
        assert!(flow.steps[2].continue_on_error);
        assert_eq!(flow.steps[2].loop_steps.len(), 1);
        assert!(flow.steps[2].loop_steps[0].step_no.is_none());
    }

    #[test]
    fn unknown_action_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"name: x\ndescription: y\nurl_prefix: z\nsteps:\n  - action: hover\n    target: a\n    description: b\n")
            .unwrap();
        assert!(matches!(
            load_flow(file.path()),
            Err(FlowError::Yaml(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_flow(Path::new("/nonexistent/flow.yaml")),
            Err(FlowError::Io(_))
        ));
    }
}
