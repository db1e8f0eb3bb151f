use serde_json::Value;

/// Lowercases every object key, recursively.
///
/// Values stored under a key listed in `opaque` (compared after lowercasing) are kept as written,
/// so caller data such as environment variable names survives untouched.
pub(crate) fn lowercase_keys(value: Value, opaque: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let key = key.to_lowercase();
                    let value = if opaque.contains(&key.as_str()) {
                        value
                    } else {
                        lowercase_keys(value, opaque)
                    };
                    (key, value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| lowercase_keys(item, opaque))
                .collect(),
        ),
        other => other,
    }
}
