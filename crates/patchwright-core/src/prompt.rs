use crate::types::Task;

/// Build the instruction handed to the agent.
///
/// The title comes first, then every `message` item as a description in
/// item order, then the comments of the task's origin issue. Each part
/// sits on its own line inside a tag the agent can tell apart.
pub fn compose_prompt(task: &Task) -> String {
    let mut lines = vec![format!("<title>{}</title>", task.title)];

    lines.extend(
        task.items
            .iter()
            .filter_map(|item| item.message_content())
            .map(|content| format!("<description>{content}</description>")),
    );

    if let Some(origin) = task.origin() {
        lines.extend(origin.origin_comments().into_iter().map(|c| {
            format!("<comment author=\"{}\">{}</comment>", c.user_name, c.body)
        }));
    }

    lines.join("\n")
}
