use crate::message::ConversationTurn;

/// In-memory transcript of one session. Turns are only ever appended;
/// `clear` drops the whole transcript at once.
#[derive(Default, Clone, Debug)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    pub fn with_turns(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> + '_ {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
