//! Image composition: splice a wrapper payload in front of an image's command.
//!
//! The wrapper image must be built so that its **last** layer carries the
//! injected executable, and its config must name that executable through a
//! label. Neither property is verified beyond "the label exists" and "there
//! is at least one layer": a wrapper whose payload lives in an earlier layer
//! is composed with the wrong layer.
//!
//! ```text
//!   upstream                 wrapper                 composed
//!   ┌──────────┐             ┌──────────┐            ┌──────────┐
//!   │ layer N  │             │ payload  │──────┐     │ payload  │
//!   │   ...    │             │   ...    │      └────▶├──────────┤
//!   │ layer 0  │             └──────────┘            │ layer N  │
//!   └──────────┘                                     │   ...    │
//!   ENTRYPOINT e  CMD c      LABEL <key>=script      │ layer 0  │
//!                                                    └──────────┘
//!                                                    ENTRYPOINT [script]
//!                                                    CMD e ++ c
//! ```

use wrapd_core::error::{CompositionStage, Result, WrapError};

use super::image::{ContainerConfig, History, OciImage};

/// Composes wrapped images.
#[derive(Debug, Clone)]
pub struct ImageComposer {
    /// Config label naming the wrapper's injected executable
    label_key: String,
}

impl ImageComposer {
    /// Create a composer that discovers the wrapper script through `label_key`.
    pub fn new(label_key: impl Into<String>) -> Self {
        Self {
            label_key: label_key.into(),
        }
    }

    /// Label key this composer reads.
    pub fn label_key(&self) -> &str {
        &self.label_key
    }

    /// Wrap `upstream` with the payload layer of `wrapper`.
    ///
    /// The result keeps every upstream layer, adds the wrapper's last layer,
    /// runs the wrapper script as entrypoint and passes the upstream
    /// `entrypoint ++ cmd` as its arguments.
    pub fn wrap(&self, upstream: OciImage, wrapper: &OciImage) -> Result<OciImage> {
        let wrapper_config = wrapper
            .config_file()
            .map_err(|e| stage_error(CompositionStage::ReadConfig, "wrapper config", e))?;

        let script = wrapper_config
            .label(&self.label_key)
            .map(str::to_string)
            .ok_or_else(|| {
                WrapError::WrapperConfig(format!(
                    "wrapper image missing '{}' label",
                    self.label_key
                ))
            })?;

        let payload_index = wrapper
            .layers()
            .len()
            .checked_sub(1)
            .ok_or_else(|| WrapError::WrapperConfig("wrapper image has no layers".to_string()))?;
        let payload = wrapper.layers()[payload_index].clone();

        let diff_ids = &wrapper_config.rootfs.diff_ids;
        if diff_ids.len() != wrapper.layers().len() {
            return Err(WrapError::composition(
                CompositionStage::AppendLayer,
                format!(
                    "wrapper config lists {} diff_ids for {} layers",
                    diff_ids.len(),
                    wrapper.layers().len()
                ),
            ));
        }
        let diff_id = diff_ids[payload_index].clone();

        let history = payload_history(&wrapper_config.history, &script);

        tracing::debug!(
            payload = %payload.descriptor.digest,
            script = %script,
            upstream_layers = upstream.layers().len(),
            "Appending wrapper layer"
        );

        let appended = upstream
            .append_layer(payload, diff_id, history)
            .map_err(|e| stage_error(CompositionStage::AppendLayer, "append wrapper layer", e))?;

        let mut config = appended
            .config_file()
            .map_err(|e| stage_error(CompositionStage::ReadConfig, "appended config", e))?;

        let container = config.config.get_or_insert_with(ContainerConfig::default);
        let mut cmd = container.entrypoint.take().unwrap_or_default();
        cmd.extend(container.cmd.take().unwrap_or_default());
        container.cmd = if cmd.is_empty() { None } else { Some(cmd) };
        container.entrypoint = Some(vec![script]);

        appended
            .with_config(&config)
            .map_err(|e| stage_error(CompositionStage::ApplyConfig, "apply config", e))
    }
}

/// History entry recorded for the payload layer: the wrapper's own entry for
/// it when one exists, otherwise a synthesized one.
fn payload_history(wrapper_history: &[History], script: &str) -> History {
    wrapper_history
        .iter()
        .rev()
        .find(|h| !h.is_empty_layer())
        .cloned()
        .unwrap_or_else(|| History {
            created_by: Some(format!("wrapd: ENTRYPOINT [\"{}\"]", script)),
            comment: Some("wrapper payload layer".to_string()),
            ..Default::default()
        })
}

fn stage_error(stage: CompositionStage, what: &str, err: WrapError) -> WrapError {
    WrapError::composition(stage, format!("{}: {}", what, err))
}
