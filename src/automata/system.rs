use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;

use super::{automaton::TimedAutomaton, cancellation::CancelToken, symbols::SymbolTable};

/// A collection of timed automata instantiated from the templates of one
/// model. Equivalence between two systems is decided pairwise by template
/// index, so corresponding templates must sit at the same position.
#[derive(Clone)]
pub struct System {
    automata: Vec<TimedAutomaton>,
    template_names: Vec<String>,
    name_to_index: HashMap<String, usize>,
    symbols: Arc<SymbolTable>,
}

impl System {
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        Self {
            automata: Vec::new(),
            template_names: Vec::new(),
            name_to_index: HashMap::new(),
            symbols,
        }
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    /// Appends an automaton under its template name.
    pub fn add_automaton(&mut self, automaton: TimedAutomaton) {
        let name = automaton.name().to_string();
        self.name_to_index.insert(name.clone(), self.automata.len());
        self.template_names.push(name);
        self.automata.push(automaton);
    }

    pub fn size(&self) -> usize {
        self.automata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.automata.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TimedAutomaton> {
        self.automata.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TimedAutomaton> {
        self.automata.get_mut(index)
    }

    pub fn get_by_name(&self, template_name: &str) -> Option<&TimedAutomaton> {
        self.name_to_index
            .get(template_name)
            .and_then(|&index| self.automata.get(index))
    }

    pub fn has_template(&self, template_name: &str) -> bool {
        self.name_to_index.contains_key(template_name)
    }

    pub fn template_name(&self, index: usize) -> Option<&str> {
        self.template_names.get(index).map(String::as_str)
    }

    pub fn template_names(&self) -> &[String] {
        &self.template_names
    }

    pub fn automata(&self) -> impl Iterator<Item = &TimedAutomaton> {
        self.automata.iter()
    }

    pub fn remove_automaton(&mut self, index: usize) {
        if index >= self.automata.len() {
            return;
        }
        self.automata.remove(index);
        self.template_names.remove(index);
        self.name_to_index.clear();
        for (position, name) in self.template_names.iter().enumerate() {
            self.name_to_index.insert(name.clone(), position);
        }
    }

    pub fn clear(&mut self) {
        self.automata.clear();
        self.template_names.clear();
        self.name_to_index.clear();
    }

    /// Builds every automaton's zone graph up front. Construction is
    /// single-threaded; afterwards the graphs are immutable and safe to
    /// share across workers.
    pub fn construct_all_zone_graphs(&mut self) -> Result<(), Error> {
        self.construct_all_zone_graphs_guarded(&CancelToken::new())
    }

    pub fn construct_all_zone_graphs_guarded(&mut self, token: &CancelToken) -> Result<(), Error> {
        for automaton in self.automata.iter_mut() {
            automaton.ensure_zone_graph_guarded(token)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::automata::symbols::SymbolTable;

    use super::super::automaton::TimedAutomaton;
    use super::System;

    fn two_template_system() -> System {
        let symbols = Arc::new(SymbolTable::new());
        let mut system = System::new(symbols.clone());

        let mut first = TimedAutomaton::new("Producer", 1, symbols.clone());
        let l0 = first.add_location("L0");
        let l1 = first.add_location("L1");
        first.add_transition(l0, l1, "produce");
        system.add_automaton(first);

        let mut second = TimedAutomaton::new("Consumer", 1, symbols);
        let l0 = second.add_location("L0");
        second.add_transition(l0, l0, "consume");
        system.add_automaton(second);

        system
    }

    #[test]
    fn lookup_by_index_and_name() {
        let system = two_template_system();
        assert_eq!(2, system.size());
        assert!(!system.is_empty());
        assert_eq!("Producer", system.get(0).unwrap().name());
        assert_eq!("Consumer", system.template_name(1).unwrap());
        assert!(system.has_template("Producer"));
        assert!(!system.has_template("Regulator"));
        assert_eq!("Consumer", system.get_by_name("Consumer").unwrap().name());
    }

    #[test]
    fn construct_all_builds_every_graph() {
        let mut system = two_template_system();
        system.construct_all_zone_graphs().unwrap();
        for automaton in system.automata() {
            assert!(automaton.zone_graph().is_constructed());
            assert!(!automaton.zone_graph().is_empty());
        }
    }

    #[test]
    fn remove_reindexes_names() {
        let mut system = two_template_system();
        system.remove_automaton(0);
        assert_eq!(1, system.size());
        assert!(!system.has_template("Producer"));
        assert_eq!("Consumer", system.get_by_name("Consumer").unwrap().name());
        assert_eq!(Some("Consumer"), system.template_name(0));
    }
}
