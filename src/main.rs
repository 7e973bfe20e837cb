fn main() {
    scanlab_lib::run()
}
