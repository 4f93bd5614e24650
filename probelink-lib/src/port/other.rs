// TODO: walk open handles on macOS (lsof) and Windows
pub fn is_port_open(_port_name: &str) -> bool {
    false
}
