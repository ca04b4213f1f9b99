//! Demangling and best-effort parameter counting for Itanium-mangled symbols.

/// Demangles `mangled`, falling back to the mangled name unchanged if it
/// isn't a valid Itanium symbol (e.g. a C symbol with no `_Z` prefix).
#[must_use]
pub fn demangle(mangled: &str) -> String {
    cpp_demangle::Symbol::new(mangled)
        .ok()
        .and_then(|sym| sym.demangle(&cpp_demangle::DemangleOptions::new()).ok())
        .unwrap_or_else(|| mangled.to_string())
}

/// Estimates the parameter count of a demangled signature by counting
/// top-level commas in the parameter list — the comma inside `foo(a, b)`
/// counts, the ones inside `foo(std::map<int, int>)` or
/// `foo(std::pair<int, int>&, int)` do not unless they are themselves at
/// nesting depth zero.
///
/// Returns `0` for a signature with an empty (or unparsable) parameter list.
#[must_use]
pub fn estimate_param_count(demangled: &str) -> usize {
    let Some(params) = extract_parameter_list(demangled) else {
        return 0;
    };
    if params.trim().is_empty() || params.trim() == "void" {
        return 0;
    }

    let mut depth_angle = 0i32;
    let mut depth_paren = 0i32;
    let mut commas = 0usize;
    for c in params.chars() {
        match c {
            '<' => depth_angle += 1,
            '>' => depth_angle -= 1,
            '(' => depth_paren += 1,
            ')' => depth_paren -= 1,
            ',' if depth_angle <= 0 && depth_paren <= 0 => commas += 1,
            _ => {}
        }
    }
    commas + 1
}

/// Extracts the substring between the outermost, last-closed parenthesis
/// pair that directly follows the function name — i.e. the parameter list,
/// not a template argument list that happens to use angle brackets.
fn extract_parameter_list(demangled: &str) -> Option<&str> {
    let bytes = demangled.as_bytes();
    let open = find_param_list_open(bytes)?;

    let mut depth = 0i32;
    let mut close = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    Some(&demangled[open + 1..close])
}

/// Finds the opening paren of the parameter list: the first top-level `(`
/// that is not nested inside an angle-bracket template argument list.
fn find_param_list_open(bytes: &[u8]) -> Option<usize> {
    let mut depth_angle = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'<' => depth_angle += 1,
            b'>' => depth_angle -= 1,
            b'(' if depth_angle <= 0 => return Some(i),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_simple_params() {
        assert_eq!(estimate_param_count("foo(int, int)"), 2);
        assert_eq!(estimate_param_count("foo()"), 0);
        assert_eq!(estimate_param_count("foo(void)"), 0);
        assert_eq!(estimate_param_count("foo(int)"), 1);
    }

    #[test]
    fn ignores_commas_inside_template_args() {
        assert_eq!(
            estimate_param_count("foo(std::map<int, int> const&, int)"),
            2
        );
    }

    #[test]
    fn ignores_commas_inside_nested_parens() {
        assert_eq!(
            estimate_param_count("foo(std::function<void(int, int)> const&)"),
            1
        );
    }

    #[test]
    fn handles_method_with_namespace_and_template_return() {
        let sig = "android::sp<android::IBinder> android::SurfaceComposerClient::createDisplay(android::String8 const&, bool)";
        assert_eq!(estimate_param_count(sig), 2);
    }

    #[test]
    fn unparsable_signature_is_zero() {
        assert_eq!(estimate_param_count("not_a_function_signature"), 0);
    }
}
