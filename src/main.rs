fn main() {
    ide_autopilot_lib::run()
}
