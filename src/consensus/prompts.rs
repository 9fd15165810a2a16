//! Prompt templates for the summarizer and the ELO judge

use super::ConsensusInput;

/// Judge's pick between two presented responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    A,
    B,
    Tie,
}

/// Prompt asking the summarizer to merge `inputs` into one answer
pub fn summary_prompt(prompt: &str, inputs: &[ConsensusInput]) -> String {
    format!(
        "You are synthesizing answers that several AI models gave to the same question.\n\n\
        Original question: {}\n\n\
        Answers:\n{}\n\
        Write a single, cohesive answer that:\n\
        1. Reflects the view most of the answers share\n\
        2. Resolves contradictions between them, noting real disagreement where it remains\n\
        3. Keeps the useful details any single answer adds\n\n\
        Provide only the synthesized answer, without meta-commentary.",
        prompt,
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| format!("Answer {} ({}):\n{}\n", i + 1, input.label, input.text))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

/// Prompt asking the judge to compare two answers
pub fn judge_prompt(prompt: &str, a: &str, b: &str) -> String {
    format!(
        "You are judging two answers to the same question.\n\n\
        Question: {prompt}\n\n\
        Response A:\n{a}\n\n\
        Response B:\n{b}\n\n\
        Which response answers the question better? Consider accuracy, completeness and clarity.\n\
        Reply with exactly one of: A, B, TIE"
    )
}

/// Read the verdict from a judge reply.
///
/// Accepts a bare `A`/`B`/`TIE` or a short sentence such as
/// "Response B is better"; anything naming both or neither is `None`.
/// Inside a sentence a lowercase `a` is the article, so letters only count
/// as capitals or right after "response"/"answer".
pub fn parse_verdict(reply: &str) -> Option<Verdict> {
    let words: Vec<&str> = reply
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let first = words.first()?.to_ascii_uppercase();
    if matches!(first.as_str(), "TIE" | "DRAW" | "EQUAL") {
        return Some(Verdict::Tie);
    }
    if words.len() == 1 {
        return match first.as_str() {
            "A" => Some(Verdict::A),
            "B" => Some(Verdict::B),
            _ => None,
        };
    }

    let (mut says_a, mut says_b) = (false, false);
    for (i, word) in words.iter().enumerate() {
        let named = i > 0
            && (words[i - 1].eq_ignore_ascii_case("response")
                || words[i - 1].eq_ignore_ascii_case("answer"));
        let letter = if named {
            word.to_ascii_uppercase()
        } else {
            word.to_string()
        };
        match letter.as_str() {
            "A" => says_a = true,
            "B" => says_b = true,
            _ => {}
        }
    }

    match (says_a, says_b) {
        (true, false) => Some(Verdict::A),
        (false, true) => Some(Verdict::B),
        _ if words.iter().any(|w| w.eq_ignore_ascii_case("tie")) => Some(Verdict::Tie),
        _ => None,
    }
}
