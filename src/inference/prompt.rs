//! Prompt construction for `infer`.

use std::fmt::Write;

use serde_json::Value;

use crate::agent::{Payload, Record};
use crate::codec::encode;
use crate::schema::TypeDescriptor;

/// Instructions, the output shape, few-shot examples, then the encoded input.
pub fn build_prompt(
    input_descriptor: &TypeDescriptor,
    output_descriptor: &TypeDescriptor,
    input: &Payload,
    examples: &[Record],
) -> String {
    let mut prompt = String::from(
        "Produce the output for the input below. Reply with a single JSON object and nothing else.\n\n",
    );

    prompt.push_str("Output fields:\n");
    for field in &output_descriptor.fields {
        let _ = writeln!(
            prompt,
            "- {}{}: {}",
            field.name,
            if field.optional { " (optional)" } else { "" },
            field.kind
        );
    }

    for (i, example) in examples.iter().enumerate() {
        let _ = write!(
            prompt,
            "\nExample {}\nInput:\n{}\nOutput:\n{}\n",
            i + 1,
            encode(&Value::Object(example.input.clone()), input_descriptor),
            encode(&Value::Object(example.output.clone()), output_descriptor)
        );
    }

    let _ = write!(
        prompt,
        "\nInput:\n{}\nOutput:\n",
        encode(&Value::Object(input.clone()), input_descriptor)
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Provenance;
    use crate::schema::{Field, FieldKind};
    use serde_json::json;

    #[test]
    fn prompt_lists_fields_examples_and_input() {
        let input_descriptor =
            TypeDescriptor::new(vec![Field::required("question", FieldKind::string())]);
        let output_descriptor = TypeDescriptor::new(vec![
            Field::required("answer", FieldKind::string()),
            Field::optional("confidence", FieldKind::number()),
        ]);
        let example = Record {
            id: 1,
            created_at: "2026-01-01T00:00:00Z".into(),
            supersedes: None,
            provenance: Provenance::Reinforced,
            input: json!({"question": "1+1?"}).as_object().unwrap().clone(),
            output: json!({"answer": "2"}).as_object().unwrap().clone(),
        };
        let input = json!({"question": "2+2?"}).as_object().unwrap().clone();

        let prompt = build_prompt(&input_descriptor, &output_descriptor, &input, &[example]);
        assert!(prompt.contains("- answer: string"));
        assert!(prompt.contains("- confidence (optional): number"));
        assert!(prompt.contains("Example 1"));
        assert!(prompt.contains("1+1?"));
        assert!(prompt.trim_end().ends_with("Output:"));
        assert!(prompt.find("1+1?").unwrap() < prompt.find("2+2?").unwrap());
    }
}
