use state_machines::state_machine;

state_machine! {
    name: AnswerMachine,
    state: AnswerState,
    initial: Analyzing,
    states: [Analyzing, Embedding, Retrieving, ContextBuilding, Prompting, Generating, Done, Failed],
    events {
        embed { transition: { from: Analyzing, to: Embedding } }
        retrieve { transition: { from: Embedding, to: Retrieving } }
        build_context { transition: { from: Retrieving, to: ContextBuilding } }
        build_prompt { transition: { from: ContextBuilding, to: Prompting } }
        generate {
            transition: { from: Analyzing, to: Generating }
            transition: { from: Prompting, to: Generating }
        }
        finish {
            transition: { from: ContextBuilding, to: Done }
            transition: { from: Generating, to: Done }
        }
        abort {
            transition: { from: Analyzing, to: Failed }
            transition: { from: Embedding, to: Failed }
            transition: { from: Retrieving, to: Failed }
            transition: { from: ContextBuilding, to: Failed }
            transition: { from: Prompting, to: Failed }
            transition: { from: Generating, to: Failed }
        }
    }
}

pub fn analyzing() -> AnswerMachine<(), Analyzing> {
    AnswerMachine::new(())
}
