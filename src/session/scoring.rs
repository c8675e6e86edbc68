use crate::schemas::submission::AnswerValue;
use crate::schemas::test::Question;

/// Whether `answer` matches the key of `question`. `None` for kinds graded by hand.
///
/// Single choice compares strings exactly. Multiple choice compares whole sets, so a
/// subset or a superset of the key earns nothing.
pub fn is_correct(question: &Question, answer: &AnswerValue) -> Option<bool> {
    match question {
        Question::SingleChoice { correct_answer, .. } => Some(match answer {
            AnswerValue::Text(given) => given == correct_answer,
            AnswerValue::Choices(_) => false,
        }),
        Question::MultipleChoice { correct_answer, .. } => Some(match answer {
            AnswerValue::Choices(given) => given == correct_answer,
            AnswerValue::Text(_) => false,
        }),
        Question::ShortText { .. } | Question::Numeric { .. } | Question::Essay { .. } => None,
    }
}

/// Number of questions answered correctly. Missing answers count as wrong.
pub fn score(questions: &[Question], answers: &[AnswerValue]) -> u32 {
    let correct = questions
        .iter()
        .zip(answers)
        .filter(|(question, answer)| is_correct(question, answer) == Some(true))
        .count();
    u32::try_from(correct).unwrap_or(u32::MAX)
}

pub fn scorable_count(questions: &[Question]) -> u32 {
    let count = questions.iter().filter(|question| question.kind().is_auto_scored()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Score as a share of every question in the test, rounded to two decimals.
pub fn percentage(score: u32, total_questions: u32) -> f64 {
    if total_questions == 0 {
        return 0.0;
    }
    let raw = f64::from(score) * 100.0 / f64::from(total_questions);
    (raw * 100.0).round() / 100.0
}
