//! The static component rendered whenever generation cannot be trusted.

use crate::validator::ValidatedSource;

/// Renders the sample data as formatted JSON.
///
/// Must keep passing [`crate::validator::Validator`]; the tests below pin it.
pub const FALLBACK_SOURCE: &str = r#"function GeneratedComponent({ data }) {
  const text = JSON.stringify(data, null, 2);
  return (
    <div className="glimpse-fallback">
      <p>This view could not be generated. Showing the raw data instead.</p>
      <pre>{text}</pre>
    </div>
  );
}"#;

/// The fallback as renderable source.
pub fn fallback_source() -> ValidatedSource {
    ValidatedSource::trusted(FALLBACK_SOURCE.to_string())
}
