use std::{collections::HashMap, fmt::Write as _, path::Path};

use anyhow::Context;
use openstream_client::{
  api::read::BaseDockerfileInfo,
  entities::app::BaseImageChoice,
};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};

pub mod requirements;

pub use requirements::Requirements;

/// Bumped when the rendered output changes shape, so images built by
/// older renderings can be told apart by their labels.
pub const COMPOSER_VERSION: &str = "2";

/// The five bundled base variants.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Display,
  EnumString,
  AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum BaseVariant {
  Minimal,
  Py39,
  Py310,
  Py311,
  Py310Datascience,
}

impl BaseVariant {
  pub fn all() -> [BaseVariant; 5] {
    [
      BaseVariant::Minimal,
      BaseVariant::Py39,
      BaseVariant::Py310,
      BaseVariant::Py311,
      BaseVariant::Py310Datascience,
    ]
  }

  pub fn file_name(&self) -> String {
    format!("Dockerfile.{self}")
  }

  pub fn description(&self) -> &'static str {
    match self {
      BaseVariant::Minimal => {
        "Python 3.11 slim with streamlit only, for lightweight apps"
      }
      BaseVariant::Py39 => "Python 3.9 with build toolchain",
      BaseVariant::Py310 => "Python 3.10 with build toolchain",
      BaseVariant::Py311 => "Python 3.11 with build toolchain",
      BaseVariant::Py310Datascience => {
        "Python 3.10 with the numeric stack preinstalled"
      }
    }
  }
}

/// Contents of the bundled base Dockerfiles, loaded once at startup
/// from a directory that stays read only afterwards.
pub struct BaseDockerfiles {
  contents: HashMap<BaseVariant, String>,
}

impl BaseDockerfiles {
  pub async fn load(dir: &Path) -> anyhow::Result<BaseDockerfiles> {
    let mut contents = HashMap::new();
    for variant in BaseVariant::all() {
      let path = dir.join(variant.file_name());
      let dockerfile = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| {
          format!(
            "missing base dockerfile at {}",
            path.display()
          )
        })?;
      contents.insert(variant, dockerfile);
    }
    Ok(BaseDockerfiles { contents })
  }

  pub fn get(&self, variant: BaseVariant) -> &str {
    // load() guarantees every variant is present
    &self.contents[&variant]
  }

  pub fn list(&self) -> Vec<BaseDockerfileInfo> {
    BaseVariant::all()
      .into_iter()
      .map(|variant| BaseDockerfileInfo {
        variant: variant.to_string(),
        name: variant.file_name(),
        description: variant.description().to_string(),
      })
      .collect()
  }
}

/// Selection when the app asks for `auto`: the numeric stack gets
/// the datascience image, any other toolchain-heavy package gets
/// py311, everything else stays minimal.
pub fn select_variant(
  choice: BaseImageChoice,
  requirements: &Requirements,
) -> BaseVariant {
  match choice {
    BaseImageChoice::Auto => {
      if requirements.needs_datascience {
        BaseVariant::Py310Datascience
      } else if !requirements.problematic.is_empty() {
        BaseVariant::Py311
      } else {
        BaseVariant::Minimal
      }
    }
    BaseImageChoice::Minimal => BaseVariant::Minimal,
    BaseImageChoice::Py39 => BaseVariant::Py39,
    BaseImageChoice::Py310 => BaseVariant::Py310,
    BaseImageChoice::Py311 => BaseVariant::Py311,
  }
}

#[derive(Debug, Clone, Default)]
pub struct ComposeInput {
  pub app_id: String,
  pub entry_file: String,
  pub base_image_choice: BaseImageChoice,
  pub custom_base_image: Option<String>,
  pub custom_overlay: Option<String>,
  pub requirements: Requirements,
}

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
  #[error(
    "custom overlay must not contain FROM instructions (line {0})"
  )]
  OverlayContainsFrom(usize),
}

#[derive(Debug, Clone)]
pub struct ComposedDockerfile {
  pub dockerfile: String,
  /// Selected variant name, or the custom base image.
  pub variant: String,
  /// sha256 of the rendered text.
  pub hash: String,
}

/// Renders the final Dockerfile: base (or custom image header plus
/// safety block), labels, optional overlay, fixed app tail. Pure;
/// identical inputs yield byte identical output.
pub fn compose(
  input: &ComposeInput,
  bases: &BaseDockerfiles,
) -> Result<ComposedDockerfile, ComposeError> {
  let mut out = String::new();
  let variant = match &input.custom_base_image {
    Some(image) if !image.is_empty() => {
      out.push_str(&format!("FROM {image}\n"));
      out.push_str(CUSTOM_BASE_SAFETY);
      image.clone()
    }
    _ => {
      let variant =
        select_variant(input.base_image_choice, &input.requirements);
      let base = bases.get(variant);
      out.push_str(base);
      if !base.ends_with('\n') {
        out.push('\n');
      }
      variant.to_string()
    }
  };

  write!(
    out,
    "\nLABEL platform.app_id=\"{}\" \\\n      platform.entry_file=\"{}\" \\\n      platform.composer_version=\"{COMPOSER_VERSION}\"\n",
    input.app_id, input.entry_file
  )
  .expect("writing to string cannot fail");

  if let Some(overlay) = &input.custom_overlay
    && !overlay.trim().is_empty()
  {
    validate_overlay(overlay)?;
    out.push_str("\n# --- custom overlay ---\n");
    out.push_str(overlay.trim_end());
    out.push('\n');
  }

  out.push_str(&app_tail(input));

  let hash = hex::encode(Sha256::digest(out.as_bytes()));

  Ok(ComposedDockerfile {
    dockerfile: out,
    variant,
    hash,
  })
}

fn validate_overlay(overlay: &str) -> Result<(), ComposeError> {
  for (i, line) in overlay.lines().enumerate() {
    let head = line.trim_start();
    let Some(keyword) = head.get(..4) else {
      continue;
    };
    if keyword.eq_ignore_ascii_case("from") {
      let after = head[4..].chars().next();
      if after.is_none_or(|c| c.is_whitespace()) {
        return Err(ComposeError::OverlayContainsFrom(i + 1));
      }
    }
  }
  Ok(())
}

/// Applied after `FROM <custom image>` so user supplied bases still
/// run unprivileged on the expected port with a healthcheck.
const CUSTOM_BASE_SAFETY: &str = r#"
# Safety baseline for custom base images
WORKDIR /app
RUN useradd --create-home --uid 1001 appuser 2>/dev/null || true
ENV PYTHONDONTWRITEBYTECODE=1 \
    PYTHONUNBUFFERED=1
EXPOSE 8501
HEALTHCHECK --interval=30s --timeout=5s --start-period=20s --retries=3 \
  CMD curl --fail http://localhost:8501/_stcore/health || exit 1
"#;

/// The fixed tail: requirements install (problematic packages first,
/// then the bulk install with a per line fallback), app copy, cache
/// purge, user drop, streamlit entrypoint.
fn app_tail(input: &ComposeInput) -> String {
  let mut out = String::from("\n# --- application ---\n");
  if input.requirements.has_requirements_txt {
    out.push_str("COPY requirements.txt ./requirements.txt\n");
    for package in &input.requirements.problematic {
      out.push_str(&format!(
        "RUN pip install --no-cache-dir \"$(grep -i '^{package}' requirements.txt | head -n 1)\" || pip install --no-cache-dir {package}\n"
      ));
    }
    out.push_str(
      "RUN pip install --no-cache-dir -r requirements.txt || \\\n  while IFS= read -r line; do \\\n    case \"$line\" in ''|'#'*) continue ;; esac; \\\n    pip install --no-cache-dir \"$line\" || echo \"failed to install $line\"; \\\n  done < requirements.txt\n",
    );
  }
  out.push_str("COPY . .\n");
  out.push_str(
    "RUN find . -name '*.pyc' -delete && find . -name '__pycache__' -type d -prune -exec rm -rf {} +\n",
  );
  out.push_str("USER appuser\n");
  out.push_str(&format!(
    "ENTRYPOINT [\"streamlit\", \"run\", \"{}\", \"--server.port=8501\", \"--server.address=0.0.0.0\", \"--server.headless=true\", \"--server.enableCORS=false\", \"--server.enableXsrfProtection=false\"]\n",
    input.entry_file
  ));
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bases() -> BaseDockerfiles {
    let contents = BaseVariant::all()
      .into_iter()
      .map(|variant| {
        (
          variant,
          format!(
            "# {}\nFROM python:slim-{variant}\nWORKDIR /app\n",
            variant.description()
          ),
        )
      })
      .collect();
    BaseDockerfiles { contents }
  }

  fn input() -> ComposeInput {
    ComposeInput {
      app_id: "7".to_string(),
      entry_file: "app.py".to_string(),
      base_image_choice: BaseImageChoice::Auto,
      custom_base_image: None,
      custom_overlay: None,
      requirements: Requirements {
        has_requirements_txt: true,
        ..Default::default()
      },
    }
  }

  #[test]
  fn identical_inputs_render_identical_output() {
    let bases = bases();
    let input = input();
    let a = compose(&input, &bases).unwrap();
    let b = compose(&input, &bases).unwrap();
    assert_eq!(a.dockerfile, b.dockerfile);
    assert_eq!(a.hash, b.hash);
  }

  #[test]
  fn auto_selects_minimal_for_plain_apps() {
    let composed = compose(&input(), &bases()).unwrap();
    assert_eq!(composed.variant, "minimal");
    assert!(composed.dockerfile.contains("FROM python:slim-minimal"));
    assert!(composed.dockerfile.contains(
      "ENTRYPOINT [\"streamlit\", \"run\", \"app.py\""
    ));
  }

  #[test]
  fn auto_selects_datascience_for_numeric_stack() {
    let mut input = input();
    input.requirements = requirements::classify_requirements_txt(
      "pandas==2.0.3\nnumpy==1.24.3\nstreamlit\n",
    );
    let composed = compose(&input, &bases()).unwrap();
    assert_eq!(composed.variant, "py310-datascience");
    // problematic packages install individually before the bulk run
    let numpy = composed
      .dockerfile
      .find("grep -i '^numpy'")
      .expect("numpy installed individually");
    let bulk = composed
      .dockerfile
      .find("-r requirements.txt")
      .expect("bulk install present");
    assert!(numpy < bulk);
  }

  #[test]
  fn auto_selects_py311_for_toolchain_packages() {
    let mut input = input();
    input.requirements =
      requirements::classify_requirements_txt("lxml\nstreamlit\n");
    let composed = compose(&input, &bases()).unwrap();
    assert_eq!(composed.variant, "py311");
  }

  #[test]
  fn custom_base_image_gets_safety_block() {
    let mut input = input();
    input.custom_base_image =
      Some("registry.local/python-ml:1.2".to_string());
    let composed = compose(&input, &bases()).unwrap();
    assert_eq!(composed.variant, "registry.local/python-ml:1.2");
    assert!(
      composed
        .dockerfile
        .starts_with("FROM registry.local/python-ml:1.2\n")
    );
    assert!(composed.dockerfile.contains("EXPOSE 8501"));
    assert!(composed.dockerfile.contains("HEALTHCHECK"));
    assert!(composed.dockerfile.contains("USER appuser"));
  }

  #[test]
  fn overlay_is_embedded_verbatim() {
    let mut input = input();
    input.custom_overlay = Some(
      "RUN apt-get update && apt-get install -y ffmpeg".to_string(),
    );
    let composed = compose(&input, &bases()).unwrap();
    assert!(
      composed
        .dockerfile
        .contains("apt-get install -y ffmpeg")
    );
  }

  #[test]
  fn overlay_with_from_is_rejected() {
    let mut input = input();
    input.custom_overlay =
      Some("RUN echo ok\nFROM alpine AS stage2".to_string());
    let err = compose(&input, &bases()).unwrap_err();
    assert!(matches!(
      err,
      ComposeError::OverlayContainsFrom(2)
    ));
    // but mentioning from inside a word or command is fine
    input.custom_overlay =
      Some("RUN echo from-here\nRUN fromage".to_string());
    compose(&input, &bases()).unwrap();
  }

  #[test]
  fn labels_carry_identity() {
    let composed = compose(&input(), &bases()).unwrap();
    assert!(
      composed.dockerfile.contains("platform.app_id=\"7\"")
    );
    assert!(
      composed
        .dockerfile
        .contains("platform.entry_file=\"app.py\"")
    );
  }

  #[test]
  fn explicit_choice_overrides_classification() {
    let mut input = input();
    input.base_image_choice = BaseImageChoice::Py39;
    input.requirements = requirements::classify_requirements_txt(
      "pandas\nstreamlit\n",
    );
    let composed = compose(&input, &bases()).unwrap();
    assert_eq!(composed.variant, "py39");
  }
}
