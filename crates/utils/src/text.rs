/// Lowercase, dash-separated form of `input` safe for folder names and URLs.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp — Q3 Launch!"), "acme-corp-q3-launch");
        assert_eq!(slugify("  spaced  "), "spaced");
        assert_eq!(slugify("***"), "");
    }
}
