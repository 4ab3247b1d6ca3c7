use vigil::cli::Cli;

fn main() {
    std::process::exit(Cli::run());
}
