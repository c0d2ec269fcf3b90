/// Replace `${VAR}` and `${VAR:-default}` placeholders in raw config text.
///
/// Unresolvable variables without a default are left as-is so the validator
/// can point at them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with an injectable lookup, for tests.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut body = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            body.push(c);
        }

        if !closed || body.is_empty() {
            // Malformed, emit literally.
            result.push_str("${");
            result.push_str(&body);
            continue;
        }

        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body.as_str(), None),
        };

        match lookup(name).filter(|v| !v.is_empty()).or(default.map(str::to_owned)) {
            Some(value) => result.push_str(&value),
            None => {
                result.push_str("${");
                result.push_str(&body);
                result.push('}');
            },
        }
    }

    result
}
