/// Taglines substituted for the `<tagline>` token in a world's MOTD.
static TAGLINES: &[&str] = &[
    "Now with more cobblestone!",
    "Dig straight down, what could go wrong?",
    "Torches sold separately.",
    "Punching trees since Beta.",
    "The creepers are only mostly asleep.",
    "Free falls, no refunds.",
    "Home of the two-block-tall ceiling.",
    "Signs may contain traces of opinion.",
    "Our bedrock is bottomless.",
    "Crafted by hand, served by wire.",
];

/// A message of the day, selected at random per send.
pub fn get_motd() -> &'static str {
    TAGLINES[rand::random::<usize>() % TAGLINES.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motd_comes_from_the_list() {
        for _ in 0..32 {
            assert!(TAGLINES.contains(&get_motd()));
        }
    }
}
