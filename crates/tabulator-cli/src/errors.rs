//! Better error messages with actionable suggestions.

use tabulator_core::{ErrorKind, Model, ModelError, QueryError, RouteError, Router};

/// Render a query error for the terminal, with hints where we have any.
pub fn query_error(err: &QueryError, model: &Model) -> String {
    match err {
        QueryError::Route(RouteError::UnknownConcept(name))
        | QueryError::Model(ModelError::UnknownConcept(name)) => unknown_concept_error(name, model),
        QueryError::Route(RouteError::NoRoute {
            concepts,
            unreachable,
        }) => no_route_error(concepts, unreachable, model),
        QueryError::Unbounded { concepts } => format!(
            "{err}.\n\nAdd a filter on one of: {}",
            concepts.join(", ")
        ),
        _ => {
            let prefix = match err.kind() {
                ErrorKind::Configuration => "Invalid query",
                ErrorKind::NoRoute => "No route",
                ErrorKind::NoProgress => "Query stalled",
                ErrorKind::Data => "Data source error",
                ErrorKind::Postprocess => "Cannot present result",
            };
            let mut msg = format!("{prefix}: {err}");
            let mut source = std::error::Error::source(err);
            while let Some(cause) = source {
                msg.push_str(&format!("\n  caused by: {cause}"));
                source = std::error::Error::source(cause);
            }
            msg
        }
    }
}

/// Build an error message for a concept the model does not know.
pub fn unknown_concept_error(name: &str, model: &Model) -> String {
    let mut msg = format!("Unknown concept '{}'", name);

    if let Some(suggestion) = find_similar_concept(name, model) {
        msg.push_str(&format!(".\n\nDid you mean '{}'?", suggestion));
        return msg;
    }

    let known: Vec<&str> = model.concepts().map(|c| c.name.as_str()).collect();
    if known.is_empty() {
        msg.push_str(". The model defines no concepts.");
    } else {
        msg.push_str(&format!(".\n\nKnown concepts: {}", known.join(", ")));
    }
    msg
}

/// Build an error message for concepts that no chain of mappings connects.
pub fn no_route_error(concepts: &[String], unreachable: &[String], model: &Model) -> String {
    let mut msg = format!("No route connects {}", concepts.join(", "));
    let router = Router::new(model);

    if let Some(first) = concepts.first() {
        let reachable = router.connected(first);
        if reachable.is_empty() {
            msg.push_str(&format!(".\n\n'{}' has no mappings.", first));
        } else {
            msg.push_str(&format!(
                ".\n\n'{}' reaches: {}",
                first,
                reachable.join(", ")
            ));
        }
    }

    for concept in unreachable {
        let reachable = router.connected(concept);
        if reachable.is_empty() {
            msg.push_str(&format!("\n'{}' has no mappings.", concept));
        } else {
            msg.push_str(&format!(
                "\n'{}' reaches only: {}",
                concept,
                reachable.join(", ")
            ));
        }
    }

    msg
}

/// Build an error message for file read errors.
pub fn file_read_error(path: &str, err: &std::io::Error) -> String {
    use std::io::ErrorKind;

    let mut msg = format!("Failed to read '{}'", path);

    match err.kind() {
        ErrorKind::NotFound => msg.push_str(": file not found"),
        ErrorKind::PermissionDenied => {
            msg.push_str(": permission denied. Check file permissions.")
        }
        _ => msg.push_str(&format!(": {}", err)),
    }

    msg
}

/// Find the closest concept name (for typo suggestions).
fn find_similar_concept<'a>(input: &str, model: &'a Model) -> Option<&'a str> {
    let input = input.to_lowercase();

    model
        .concepts()
        .map(|c| c.name.as_str())
        .filter_map(|name| {
            let lower = name.to_lowercase();
            if lower == input {
                return Some((0, name));
            }
            let distance = levenshtein(&input, &lower);
            (distance <= 2).then_some((distance, name))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, name)| name)
}

/// Simple Levenshtein distance for short strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabulator_core::ValueType;

    fn model() -> Model {
        let mut model = Model::new();
        for name in ["article", "project", "date"] {
            model.register_concept(name, ValueType::Identifier).unwrap();
        }
        model
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_did_you_mean() {
        let model = model();
        let msg = unknown_concept_error("artcle", &model);
        assert!(msg.contains("Did you mean 'article'?"));

        let msg = unknown_concept_error("Project", &model);
        assert!(msg.contains("Did you mean 'project'?"));

        let msg = unknown_concept_error("weather", &model);
        assert!(msg.contains("Known concepts: article, project, date"));
    }

    #[test]
    fn test_no_route_hint() {
        let model = model();
        let msg = no_route_error(
            &["article".into(), "date".into()],
            &["date".into()],
            &model,
        );
        assert!(msg.contains("'article' has no mappings."));
        assert!(msg.contains("'date' has no mappings."));
    }
}
