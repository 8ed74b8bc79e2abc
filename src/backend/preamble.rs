const PREAMBLE_IDENTITY: &str = "Tu es l'assistant virtuel de BTP Connect, plateforme BTP au Sénégal.\n\n";

const PREAMBLE_STYLE: &str = "IMPORTANT: Réponds TOUJOURS de manière TRÈS COURTE et CONCISE \
                              (maximum 2-3 phrases).\n\n";

const PREAMBLE_ROLE: &str = "Ton rôle: Aider avec les commandes, livraisons, prix, matériaux BTP et projets.\n\n\
                             Contexte: Marketplace matériaux construction Sénégal, paiements FCFA, \
                             fournisseurs locaux.\n\n";

const PREAMBLE_RULES: &str = "Pour les statuts de commandes, invente des réponses courtes et réalistes.\n\
                              Pour les fournisseurs, suggère des noms sénégalais fictifs.\n\n\
                              Réponds en français, sois direct et concis.";

pub fn system_preamble() -> String {
    let mut preamble = String::with_capacity(640);
    preamble.push_str(PREAMBLE_IDENTITY);
    preamble.push_str(PREAMBLE_STYLE);
    preamble.push_str(PREAMBLE_ROLE);
    preamble.push_str(PREAMBLE_RULES);
    preamble
}

/// Preamble, then the optional context block, then the user turn left open
/// for the model to complete.
pub fn build_prompt(message: &str, context: Option<&str>) -> String {
    let mut prompt = system_preamble();
    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n\nContexte: ");
        prompt.push_str(context);
    }
    prompt.push_str("\n\nUtilisateur: ");
    prompt.push_str(message);
    prompt.push_str("\nAssistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_context_ends_with_open_turn() {
        let prompt = build_prompt("Prix du ciment ?", None);
        assert!(prompt.starts_with("Tu es l'assistant virtuel de BTP Connect"));
        assert!(prompt.ends_with("\n\nUtilisateur: Prix du ciment ?\nAssistant:"));
        assert!(!prompt.contains("Contexte:"));
    }

    #[test]
    fn context_sits_between_preamble_and_message() {
        let prompt = build_prompt("et le fer ?", Some("user: ciment\nassistant: SOCOCIM"));
        let context_at = prompt.find("\n\nContexte: user: ciment\nassistant: SOCOCIM").unwrap();
        let message_at = prompt.find("\n\nUtilisateur: et le fer ?").unwrap();
        assert!(prompt[..context_at].contains("FCFA"));
        assert!(context_at < message_at);
    }

    #[test]
    fn blank_context_is_omitted() {
        assert_eq!(build_prompt("salut", Some("  ")), build_prompt("salut", None));
    }
}
