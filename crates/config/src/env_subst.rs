/// Expand `${ENV_VAR}` references in raw config text.
///
/// Variables that are unset (or empty names / unterminated braces) stay
/// exactly as written, so a config can mention `${...}` literally without
/// escaping.
pub fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) if end > 0 => {
                let name = &tail[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &tail[end + 1..];
            },
            _ => {
                // No closing brace (or `${}`) — keep the literal text.
                out.push_str("${");
                rest = tail;
            },
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(unsafe_code)] // set_var is unsafe in edition 2024
mod tests {
    use super::substitute_env;

    #[test]
    fn expands_set_variable() {
        unsafe { std::env::set_var("HERALD_SUBST_TOKEN", "sekrit") };
        assert_eq!(
            substitute_env("access_token = \"${HERALD_SUBST_TOKEN}\""),
            "access_token = \"sekrit\""
        );
        unsafe { std::env::remove_var("HERALD_SUBST_TOKEN") };
    }

    #[test]
    fn keeps_unset_variable_literal() {
        assert_eq!(
            substitute_env("${HERALD_SUBST_MISSING_VAR}"),
            "${HERALD_SUBST_MISSING_VAR}"
        );
    }

    #[test]
    fn unterminated_brace_is_literal() {
        assert_eq!(substitute_env("ws://host/${oops"), "ws://host/${oops");
    }

    #[test]
    fn plain_text_passthrough() {
        assert_eq!(substitute_env("nothing here"), "nothing here");
    }
}
