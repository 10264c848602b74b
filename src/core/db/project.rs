use time::OffsetDateTime;

pub struct UpdateProjectSettings {
    pub name: Option<String>,
    pub created_at: Option<OffsetDateTime>,
}

/// Project-level metadata and the positional class vocabulary. Class identity
/// for export is the position in the list, so the vocabulary can only be
/// replaced while no stored box references it.
pub trait ProjectRepository {
    fn get_project_name(&self) -> impl Future<Output = anyhow::Result<String>>;
    fn get_project_created_at(&self) -> impl Future<Output = anyhow::Result<OffsetDateTime>>;
    fn set_project_settings(
        &self,
        settings: UpdateProjectSettings,
    ) -> impl Future<Output = anyhow::Result<()>>;
    fn get_classes(&self) -> impl Future<Output = anyhow::Result<Vec<String>>>;
    fn set_classes(&self, classes: &[String]) -> impl Future<Output = anyhow::Result<()>>;
}

/// Parse the comma-separated class vocabulary the administrator types in
/// ("Coke, Pepsi"), trimming whitespace and dropping empty entries.
pub fn parse_class_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
