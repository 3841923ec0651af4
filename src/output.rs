/// `Client.exe` -> `Client_patched.exe`, `Client` -> `Client_patched`.
pub fn patched_file_name(name: &str) -> String {
  match name.rsplit_once('.') {
    Some((stem, ext)) if !stem.is_empty() => format!("{}_patched.{}", stem, ext),
    _ => format!("{}_patched", name),
  }
}

/// Last path segment of a URL, without query or fragment.
pub fn file_name_from_url(url: &str) -> Option<&str> {
  let path = url.split(['?', '#']).next()?;
  path.rsplit('/').next().filter(|name| !name.is_empty())
}
