use std::path::Path;

use anyhow::Context;

/// Packages which historically require C / Fortran toolchains to
/// build from source. Presence forces a heavier base image.
pub const PROBLEMATIC_PACKAGES: [&str; 9] = [
  "numpy",
  "scipy",
  "pandas",
  "scikit-learn",
  "torch",
  "tensorflow",
  "pillow",
  "lxml",
  "h5py",
];

/// The numeric stack subset which gets the dedicated datascience
/// base image rather than just a toolchain-capable one.
const DATASCIENCE_PACKAGES: [&str; 6] = [
  "numpy",
  "scipy",
  "pandas",
  "scikit-learn",
  "torch",
  "tensorflow",
];

/// Classification of an app's Python dependencies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirements {
  pub python_version_hint: Option<String>,
  pub needs_datascience: bool,
  pub problematic: Vec<String>,
  pub has_requirements_txt: bool,
}

/// Reads `requirements.txt`, `pyproject.toml` or `Pipfile.lock`
/// (first match wins) from the workspace root. No file at all is an
/// empty classification, not an error.
pub async fn analyze(
  workspace: &Path,
) -> anyhow::Result<Requirements> {
  let requirements_txt = workspace.join("requirements.txt");
  if requirements_txt.exists() {
    let contents = tokio::fs::read_to_string(&requirements_txt)
      .await
      .context("failed to read requirements.txt")?;
    return Ok(classify_requirements_txt(&contents));
  }

  let pyproject = workspace.join("pyproject.toml");
  if pyproject.exists() {
    let contents = tokio::fs::read_to_string(&pyproject)
      .await
      .context("failed to read pyproject.toml")?;
    return Ok(classify_pyproject(&contents)?);
  }

  let pipfile_lock = workspace.join("Pipfile.lock");
  if pipfile_lock.exists() {
    let contents = tokio::fs::read_to_string(&pipfile_lock)
      .await
      .context("failed to read Pipfile.lock")?;
    return Ok(classify_pipfile_lock(&contents)?);
  }

  Ok(Requirements::default())
}

pub fn classify_requirements_txt(contents: &str) -> Requirements {
  let names = contents.lines().filter_map(requirement_name);
  let mut requirements = classify_names(names);
  requirements.has_requirements_txt = true;
  requirements
}

fn classify_pyproject(
  contents: &str,
) -> anyhow::Result<Requirements> {
  let value: toml::Value =
    toml::from_str(contents).context("invalid pyproject.toml")?;
  let project = value.get("project");
  let names = project
    .and_then(|project| project.get("dependencies"))
    .and_then(|dependencies| dependencies.as_array())
    .map(|dependencies| {
      dependencies
        .iter()
        .filter_map(|dep| dep.as_str())
        .filter_map(requirement_name)
        .collect::<Vec<_>>()
    })
    .unwrap_or_default();
  let mut requirements = classify_names(names.into_iter());
  requirements.python_version_hint = project
    .and_then(|project| project.get("requires-python"))
    .and_then(|version| version.as_str())
    .and_then(version_hint);
  Ok(requirements)
}

fn classify_pipfile_lock(
  contents: &str,
) -> anyhow::Result<Requirements> {
  let value: serde_json::Value =
    serde_json::from_str(contents).context("invalid Pipfile.lock")?;
  let names = value
    .get("default")
    .and_then(|default| default.as_object())
    .map(|default| {
      default
        .keys()
        .filter_map(|name| requirement_name(name))
        .collect::<Vec<_>>()
    })
    .unwrap_or_default();
  let mut requirements = classify_names(names.into_iter());
  requirements.python_version_hint = value
    .pointer("/_meta/requires/python_version")
    .and_then(|version| version.as_str())
    .map(|version| version.to_string());
  Ok(requirements)
}

fn classify_names(
  names: impl Iterator<Item = String>,
) -> Requirements {
  let mut problematic = Vec::new();
  let mut needs_datascience = false;
  for name in names {
    if PROBLEMATIC_PACKAGES.contains(&name.as_str())
      && !problematic.contains(&name)
    {
      needs_datascience |=
        DATASCIENCE_PACKAGES.contains(&name.as_str());
      problematic.push(name);
    }
  }
  problematic.sort();
  Requirements {
    python_version_hint: None,
    needs_datascience,
    problematic,
    has_requirements_txt: false,
  }
}

/// Normalized package name from a requirement spec line, eg
/// `Pandas[excel] >=2.0 ; python_version < "3.12"` -> `pandas`.
fn requirement_name(line: &str) -> Option<String> {
  let line = line.trim();
  if line.is_empty()
    || line.starts_with('#')
    || line.starts_with('-')
  {
    return None;
  }
  let end = line
    .find(|c: char| "=<>!~;[ ".contains(c))
    .unwrap_or(line.len());
  let name = line[..end].trim().to_lowercase().replace('_', "-");
  if name.is_empty() { None } else { Some(name) }
}

/// Pulls a `3.x` version out of a `requires-python` constraint.
fn version_hint(constraint: &str) -> Option<String> {
  let start = constraint.find("3.")?;
  let tail = &constraint[start..];
  let end = tail
    .char_indices()
    .find(|(i, c)| *i >= 2 && !c.is_ascii_digit())
    .map(|(i, _)| i)
    .unwrap_or(tail.len());
  Some(tail[..end].to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_streamlit_is_unproblematic() {
    let requirements =
      classify_requirements_txt("streamlit==1.28.1\nrequests\n");
    assert!(requirements.problematic.is_empty());
    assert!(!requirements.needs_datascience);
    assert!(requirements.has_requirements_txt);
  }

  #[test]
  fn datascience_stack_is_detected() {
    let requirements = classify_requirements_txt(
      "streamlit==1.28.1\npandas==2.0.3\nnumpy==1.24.3\n",
    );
    assert_eq!(requirements.problematic, ["numpy", "pandas"]);
    assert!(requirements.needs_datascience);
  }

  #[test]
  fn toolchain_only_packages_are_problematic_not_datascience() {
    let requirements =
      classify_requirements_txt("Pillow>=10\nlxml\nstreamlit\n");
    assert_eq!(requirements.problematic, ["lxml", "pillow"]);
    assert!(!requirements.needs_datascience);
  }

  #[test]
  fn specs_extras_and_markers_are_stripped() {
    assert_eq!(
      requirement_name("Scikit_Learn[alldeps] >=1.3 ; extra"),
      Some("scikit-learn".to_string())
    );
    assert_eq!(requirement_name("# comment"), None);
    assert_eq!(requirement_name("-r other.txt"), None);
  }

  #[test]
  fn pyproject_dependencies_and_python_hint() {
    let requirements = classify_pyproject(
      r#"
[project]
name = "demo"
requires-python = ">=3.10,<3.13"
dependencies = ["streamlit", "torch>=2.0"]
"#,
    )
    .unwrap();
    assert_eq!(requirements.problematic, ["torch"]);
    assert!(requirements.needs_datascience);
    assert_eq!(
      requirements.python_version_hint.as_deref(),
      Some("3.10")
    );
  }

  #[test]
  fn pipfile_lock_default_section() {
    let requirements = classify_pipfile_lock(
      r#"{
  "_meta": { "requires": { "python_version": "3.11" } },
  "default": {
    "streamlit": { "version": "==1.28.1" },
    "numpy": { "version": "==1.24.3" }
  },
  "develop": {}
}"#,
    )
    .unwrap();
    assert_eq!(requirements.problematic, ["numpy"]);
    assert_eq!(
      requirements.python_version_hint.as_deref(),
      Some("3.11")
    );
  }

  #[tokio::test]
  async fn missing_files_classify_empty() {
    let dir = std::env::temp_dir()
      .join(format!("os-req-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let requirements = analyze(&dir).await.unwrap();
    assert_eq!(requirements, Requirements::default());
    tokio::fs::remove_dir_all(&dir).await.unwrap();
  }
}
