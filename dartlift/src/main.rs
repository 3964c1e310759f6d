use dartlift::*;

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::Parser;

/// Lift AOT snapshot machine code into typed IL
#[derive(Parser, Debug)]
#[clap(about, version, author)]
enum Args {
    /// Lift functions from an exported disassembly dump
    FromDump {
        /// Path to a `.asm-exported` file produced by the snapshot exporter
        exported_asm: PathBuf,
        /// Path to output file for the IL listing; stdout when omitted
        #[clap(long)]
        output_il: Option<PathBuf>,
        /// Disable terminal logging, even for high severity alerts. Strongly
        /// discouraged for normal use.
        #[clap(long)]
        debug_disable_terminal_logging: bool,
        /// Force blocking for terminal logging. If too many messages are
        /// being spewed the logger, by default, does not block, but instead
        /// dumps a dropped-messages alert. This option forces it to block and
        /// dump even if too many are being sent.
        #[clap(long)]
        debug_forced_blocking_terminal_logging: bool,
        /// Path to send log (as JSON) to
        ///
        /// Error or higher severity alerts will still continue being shown at
        /// stderr (in addition to being added to the log)
        #[clap(long = "log")]
        log_file: Option<PathBuf>,
        /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
        #[clap(short, long, parse(from_occurrences))]
        debug: usize,
        /// Advanced configuration options to tweak the lifter behavior
        #[clap(short = 'Z', long, arg_enum)]
        advanced_config: Vec<analysis_config::CommandLineAnalysisConfig>,
    },
}

fn render_program(dump: &asm_loader::AotDump) -> String {
    let mut out = String::new();
    for fun in &dump.functions {
        writeln!(out, "fn {} @ {:#x}", fun.name, fun.entry).unwrap();
        for il in lifter::lift_function(&dump.env, fun) {
            writeln!(out, "    {:x}-{:x}: {}", il.start(), il.end(), il).unwrap();
        }
        writeln!(out).unwrap();
    }
    out
}

fn main() {
    let args = Args::parse();

    match args {
        Args::FromDump {
            exported_asm,
            output_il,
            debug_disable_terminal_logging,
            debug_forced_blocking_terminal_logging,
            log_file,
            debug,
            advanced_config,
        } => {
            let _log_guard = slog_scope::set_global_logger(log::FileAndTermDrain::new(
                debug,
                debug_disable_terminal_logging,
                debug_forced_blocking_terminal_logging,
                log_file,
            ));

            analysis_config::AnalysisConfig::initialize(advanced_config);

            let dump = asm_loader::load_from(
                &std::fs::read_to_string(exported_asm).expect("Export file could not be read"),
            );

            let listing = render_program(&dump);
            if let Some(path) = output_il {
                use std::io::Write;
                write!(std::fs::File::create(path).unwrap(), "{}", listing).unwrap();
            } else {
                print!("{}", listing);
            }

            log::trace!("Done");
        }
    }
}
