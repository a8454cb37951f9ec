#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
    },
    CommandSpec {
        command: "redeem",
        action: "redeem",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "photo",
        action: "select_subject",
    },
    CommandSpec {
        command: "style",
        action: "select_style",
    },
    CommandSpec {
        command: "export",
        action: "export_selected",
    },
];

pub(crate) const INDEX_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "select",
        action: "toggle_selection",
    },
    CommandSpec {
        command: "view",
        action: "view_history",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "suggest",
        action: "suggest",
    },
    CommandSpec {
        command: "describe",
        action: "describe",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "animate",
        action: "animate",
    },
    CommandSpec {
        command: "close",
        action: "close_modal",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/photo PATH",
    "/style PATH",
    "/prompt TEXT",
    "/generate",
    "/suggest",
    "/describe",
    "/redeem CODE",
    "/status",
    "/history",
    "/view N",
    "/select N...",
    "/export DIR",
    "/animate",
    "/close",
    "/reset",
    "/quit",
];
