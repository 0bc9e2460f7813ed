use std::fmt::Write as _;

use crate::models::{Role, ScoredChunk, TaskDirective, Turn};

/// A fully rendered generation request. `grounded` is false when retrieval
/// came back empty, so the generation layer can disclose the lack of source
/// material instead of improvising.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    pub grounded: bool,
    pub context_chunk_ids: Vec<String>,
}

/// Rough token estimate used for the context budget; providers tokenize
/// differently, so 4 characters per token is close enough for truncation.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Combines the task directive, retrieved chunks, and recent history into a
/// single prompt, deterministically.
pub struct PromptAssembler {
    max_context_tokens: usize,
    history_window: usize,
}

impl PromptAssembler {
    pub fn new(max_context_tokens: usize, history_window: usize) -> Self {
        Self {
            max_context_tokens,
            history_window,
        }
    }

    /// Chunks arrive most relevant first and are dropped from the
    /// lowest-scoring end when the budget would be exceeded; the
    /// highest-scoring chunk is always kept.
    pub fn assemble(
        &self,
        directive: TaskDirective,
        student_input: &str,
        retrieved: &[ScoredChunk],
        history: &[Turn],
    ) -> AssembledPrompt {
        let selected = self.select_within_budget(retrieved);
        let grounded = !selected.is_empty();

        let context = if grounded {
            selected
                .iter()
                .map(|hit| hit.chunk.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            "(no study material matched this request; say so rather than guessing)".to_string()
        };

        let mut text = String::new();
        text.push_str(
            "You are a patient and helpful study tutor. Use only the context below to help the student.\n\n",
        );
        let _ = writeln!(text, "Context from study materials:\n{context}\n");

        let recent = self.recent_history(history);
        if !recent.is_empty() {
            text.push_str("Conversation so far:\n");
            for turn in recent {
                let speaker = match turn.role {
                    Role::User => "Student",
                    Role::Assistant => "Tutor",
                };
                let _ = writeln!(text, "{speaker}: {}", turn.content);
            }
            text.push('\n');
        }

        let _ = writeln!(text, "Student: {student_input}\n");
        text.push_str(directive_instructions(directive));
        text.push_str("\n\nTutor:");

        AssembledPrompt {
            text,
            grounded,
            context_chunk_ids: selected
                .iter()
                .map(|hit| hit.chunk.chunk_id.clone())
                .collect(),
        }
    }

    fn select_within_budget<'a>(&self, retrieved: &'a [ScoredChunk]) -> Vec<&'a ScoredChunk> {
        let mut selected = Vec::new();
        let mut spent = 0usize;
        for hit in retrieved {
            let cost = estimate_tokens(&hit.chunk.text);
            if spent + cost > self.max_context_tokens && !selected.is_empty() {
                break;
            }
            spent += cost;
            selected.push(hit);
        }
        selected
    }

    fn recent_history<'a>(&self, history: &'a [Turn]) -> &'a [Turn] {
        let skip = history.len().saturating_sub(self.history_window);
        &history[skip..]
    }
}

fn directive_instructions(directive: TaskDirective) -> &'static str {
    match directive {
        TaskDirective::Explain => {
            "As a tutor:\n\
             1. Answer the student's question clearly and concisely.\n\
             2. Explain concepts in simple terms, with examples when helpful.\n\
             3. If the student offered an answer, give constructive feedback.\n\
             4. Ask a short follow-up question to check understanding."
        }
        TaskDirective::Summarize => {
            "Summarize the key points of the study material above:\n\
             1. Lead with the central concepts, not minor details.\n\
             2. Keep the summary short and organized.\n\
             3. Note anything the student asked about that the material does not cover."
        }
        TaskDirective::GenerateQuestions {
            difficulty: crate::models::Difficulty::Easy,
        } => QUESTION_INSTRUCTIONS_EASY,
        TaskDirective::GenerateQuestions {
            difficulty: crate::models::Difficulty::Medium,
        } => QUESTION_INSTRUCTIONS_MEDIUM,
        TaskDirective::GenerateQuestions {
            difficulty: crate::models::Difficulty::Hard,
        } => QUESTION_INSTRUCTIONS_HARD,
    }
}

const QUESTION_INSTRUCTIONS_EASY: &str = "Create easy practice questions from the study material above:\n\
     1. Write 3-4 questions that test recall of key facts.\n\
     2. Keep them clear and answerable from the material alone.";

const QUESTION_INSTRUCTIONS_MEDIUM: &str = "Create medium-difficulty practice questions from the study material above:\n\
     1. Write 3-4 questions mixing factual recall with conceptual understanding.\n\
     2. Keep them clear and answerable from the material alone.";

const QUESTION_INSTRUCTIONS_HARD: &str = "Create hard practice questions from the study material above:\n\
     1. Write 3-4 questions that require connecting multiple concepts.\n\
     2. Keep them answerable from the material alone, without outside facts.";
