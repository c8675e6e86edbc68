use crate::schemas::submission::AnswerValue;
use crate::schemas::test::Question;

/// One answer slot per question index. Slots are shaped by question kind on creation but
/// accept any value afterwards; the UI is trusted to send well-typed answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerStore {
    slots: Vec<AnswerValue>,
}

impl AnswerStore {
    pub fn for_questions(questions: &[Question]) -> Self {
        Self {
            slots: questions.iter().map(|question| AnswerValue::empty_for(question.kind())).collect(),
        }
    }

    /// Replaces the slot at `index`. Returns `None` when no such question exists.
    pub(crate) fn set(&mut self, index: usize, value: AnswerValue) -> Option<()> {
        let slot = self.slots.get_mut(index)?;
        *slot = value;
        Some(())
    }

    pub fn get(&self, index: usize) -> Option<&AnswerValue> {
        self.slots.get(index)
    }

    pub fn as_slice(&self) -> &[AnswerValue] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn answered(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_empty()).count()
    }
}
