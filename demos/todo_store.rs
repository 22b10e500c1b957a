//! Demonstration of a Store driven by dispatched actions
//!
//! Run with `RUST_LOG=flux_store=trace` to see dispatch and routing events.

use flux_store::{Action, Dispatcher, State, Store, StoreConfig};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

fn todos(state: &State) -> Vec<Value> {
    state
        .get("todos")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn stats(state: &State) -> (usize, usize, usize) {
    let todos = todos(state);
    let total = todos.len();
    let completed = todos.iter().filter(|t| t["completed"] == json!(true)).count();
    (total, total - completed, completed)
}

fn print_todos(store: &Store) {
    store.read(|state| {
        let filter = state.get("filter").and_then(Value::as_str).unwrap_or("all");
        for todo in todos(state) {
            let completed = todo["completed"] == json!(true);
            let visible = match filter {
                "active" => !completed,
                "completed" => completed,
                _ => true,
            };
            if visible {
                let status = if completed { "✓" } else { " " };
                println!("   [{}] {}", status, todo["title"].as_str().unwrap_or_default());
            }
        }
    });
}

fn main() -> flux_store::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Store Example: Todo App ===\n");

    let dispatcher = Dispatcher::new();
    let mut initial = State::new();
    initial.insert("todos".to_string(), json!([]));
    initial.insert("filter".to_string(), json!("all"));
    let store = Store::with_config(
        StoreConfig::named("Todo").with_initial_state(initial),
        dispatcher.clone(),
    );

    store.define_method("add", |store, payload| {
        let mut todos = store.read(todos);
        let id = todos.len();
        todos.push(json!({ "id": id, "title": payload, "completed": false }));
        store.set_state([("todos", Value::Array(todos))]);
    });
    store.define_method("toggle", |store, payload| {
        let mut todos = store.read(todos);
        if let Some(todo) = todos.iter_mut().find(|t| &t["id"] == payload) {
            let completed = todo["completed"] == json!(true);
            todo["completed"] = json!(!completed);
        }
        store.set_state([("todos", Value::Array(todos))]);
    });
    store.define_method("set_filter", |store, payload| {
        store.set_state([("filter", payload.clone())]);
    });

    println!("1. Binding actions");
    store.bind_actions_json(
        r#"{ "Todo": { "*": ["add", "toggle"], "filter": "set_filter" } }"#,
    )?;

    println!("\n2. Setting up listener on \"{}\"", store.change_event_name());
    {
        let handle = store.downgrade();
        store.add_change_listener(move || {
            let Some(store) = handle.upgrade() else {
                return;
            };
            let (total, active, completed) = store.read(stats);
            println!(
                "   [Store Update] Total: {}, Active: {}, Completed: {}",
                total, active, completed
            );
        });
    }

    println!("\n3. Adding todos");
    for title in ["Learn Rust", "Build a store", "Write documentation"] {
        dispatcher.dispatch(Action::new("Todo.add", json!(title)))?;
    }

    println!("\n4. Current todos:");
    print_todos(&store);

    println!("\n5. Completing the first two todos");
    dispatcher.dispatch(Action::new("Todo.toggle", json!(0)))?;
    dispatcher.dispatch(Action::new("Todo.toggle", json!(1)))?;

    println!("\n6. Filtering to show only active todos");
    dispatcher.dispatch(Action::new("Todo.filter", json!("active")))?;
    print_todos(&store);

    println!("\n7. Unbound actions are ignored");
    dispatcher.dispatch(Action::new("Todo.archive", json!(0)))?;

    let (total, active, completed) = store.read(stats);
    println!("\n8. Final statistics:");
    println!("   Total: {}", total);
    println!("   Active: {}", active);
    println!("   Completed: {}", completed);

    println!("\n✓ Example complete!");
    Ok(())
}
