fn main() {
    grid_screening::cli::run();
}
