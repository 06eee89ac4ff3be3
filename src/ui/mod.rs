mod spinner;
mod status;
mod table;

use std::io::IsTerminal;

pub use spinner::{progress_bar, with_spinner};
pub use status::{print_command_status, CommandStatus};
pub use table::{apply_column_padding, header, styled_table, truncate};

pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}
