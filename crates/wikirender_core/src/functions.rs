use crate::brackets::split_once_top_level;

/// Evaluate `{{#function: first | rest... }}`. Returns `None` for an unknown
/// function name. Branches are returned unexpanded.
pub fn evaluate_function(
    function: &str,
    first: &str,
    rest: &[&str],
    expand: &mut dyn FnMut(&str) -> String,
) -> Option<String> {
    let function = function.trim().to_lowercase();
    let result = match function.as_str() {
        "#if" => evaluate_if(first, rest, expand),
        "#ifeq" => evaluate_ifeq(first, rest, expand),
        "#switch" => evaluate_switch(first, rest, expand),
        _ => return None,
    };
    Some(result)
}

fn evaluate_if(test: &str, rest: &[&str], expand: &mut dyn FnMut(&str) -> String) -> String {
    let branch = if expand(test).trim().is_empty() {
        rest.get(1)
    } else {
        rest.first()
    };
    expand_branch(branch.copied(), expand)
}

fn evaluate_ifeq(left: &str, rest: &[&str], expand: &mut dyn FnMut(&str) -> String) -> String {
    let left = expand(left).trim().to_string();
    let right = rest
        .first()
        .map(|value| expand(value).trim().to_string())
        .unwrap_or_default();
    let branch = if values_equal(&left, &right) {
        rest.get(1)
    } else {
        rest.get(2)
    };
    expand_branch(branch.copied(), expand)
}

fn evaluate_switch(value: &str, cases: &[&str], expand: &mut dyn FnMut(&str) -> String) -> String {
    let value = expand(value).trim().to_string();
    let mut default: Option<&str> = None;
    let mut falling_through = false;

    for (index, case) in cases.iter().enumerate() {
        match split_once_top_level(case, '=') {
            Some((label, result)) => {
                let label = expand(label).trim().to_string();
                if falling_through || values_equal(&label, &value) {
                    return expand_branch(Some(result), expand);
                }
                if label == "#default" {
                    default = Some(result);
                }
            }
            None => {
                if index + 1 == cases.len() {
                    return expand_branch(Some(case), expand);
                }
                if values_equal(expand(case).trim(), &value) {
                    falling_through = true;
                }
            }
        }
    }
    expand_branch(default, expand)
}

fn expand_branch(branch: Option<&str>, expand: &mut dyn FnMut(&str) -> String) -> String {
    branch
        .map(|text| expand(text).trim().to_string())
        .unwrap_or_default()
}

/// Numeric comparison when both sides parse as numbers, string equality
/// otherwise.
fn values_equal(left: &str, right: &str) -> bool {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(left), Ok(right)) => left == right,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::evaluate_function;

    fn run(function: &str, first: &str, rest: &[&str]) -> Option<String> {
        let mut identity = |text: &str| text.to_string();
        evaluate_function(function, first, rest, &mut identity)
    }

    #[test]
    fn if_selects_branch_on_non_blank_test() {
        assert_eq!(run("#if", " x ", &[" yes ", " no "]).as_deref(), Some("yes"));
        assert_eq!(run("#if", "   ", &[" yes ", " no "]).as_deref(), Some("no"));
        assert_eq!(run("#if", "", &["yes"]).as_deref(), Some(""));
    }

    #[test]
    fn ifeq_compares_numbers_and_strings() {
        assert_eq!(run("#ifeq", "01", &["1", "same", "diff"]).as_deref(), Some("same"));
        assert_eq!(run("#ifeq", "a", &["A", "same", "diff"]).as_deref(), Some("diff"));
    }

    #[test]
    fn switch_supports_fallthrough_and_defaults() {
        let cases = ["a = first", "b", "c = shared", "#default = fallback"];
        assert_eq!(run("#switch", "a", &cases).as_deref(), Some("first"));
        assert_eq!(run("#switch", "b", &cases).as_deref(), Some("shared"));
        assert_eq!(run("#switch", "z", &cases).as_deref(), Some("fallback"));
        assert_eq!(run("#switch", "z", &["a=1", "last"]).as_deref(), Some("last"));
        assert_eq!(run("#switch", "z", &["a=1"]).as_deref(), Some(""));
    }

    #[test]
    fn only_selected_branch_is_expanded() {
        let mut expanded = Vec::new();
        let mut record = |text: &str| {
            expanded.push(text.to_string());
            text.to_string()
        };
        let out = evaluate_function("#if", "x", &["then", "else"], &mut record);
        assert_eq!(out.as_deref(), Some("then"));
        assert_eq!(expanded, vec!["x".to_string(), "then".to_string()]);
    }

    #[test]
    fn unknown_function_is_none() {
        assert!(run("#invoke", "Module", &["main"]).is_none());
    }
}
