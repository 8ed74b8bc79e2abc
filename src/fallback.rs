//! Canned replies used when the model backend is down or fails.

use rand::Rng;
use rand::seq::SliceRandom;

pub const STATUS_REPLIES: [&str; 5] = [
    "Votre commande est en cours d'expédition, livraison dans 2-3 jours.",
    "Commande préparée, en transit vers votre adresse.",
    "Votre commande arrive demain !",
    "En préparation à Rufisque, expédition aujourd'hui.",
    "Commande confirmée, livraison sous 48h.",
];

const STATUS_KEYWORDS: &[&str] = &["statut", "état", "suivi", "où est", "dernière commande"];

pub const DEFAULT_REPLY: &str =
    "Pour une assistance personnalisée, contactez notre support ou consultez l'aide.";

/// Checked in order after the status category; the first hit wins.
const CATEGORIES: &[(&[&str], &str)] = &[
    (
        &["ciment", "béton"],
        "Ciment disponible : SOCOCIM Industries, Ciments du Sahel. Livraison partout au Sénégal.",
    ),
    (
        &["fer", "acier", "ferraille"],
        "Fer à béton : Métallurgie Sénégalaise, Fer et Acier Dakar. Barres 6mm à 32mm en stock.",
    ),
    (
        &["sable", "gravier", "granulat"],
        "Granulats : Carrières de Diack, Sable et Gravier Thiès. Sable de mer et gravier disponibles.",
    ),
    (
        &["brique", "parpaing", "bloc"],
        "Parpaings : Briqueterie Moderne, Blocs Sénégal Plus. Formats 15x20x40 et 20x20x40.",
    ),
    (
        &["fournisseur", "qui vend", "où acheter"],
        "Plus de 150 fournisseurs certifiés. Précisez le matériau recherché.",
    ),
    (
        &["commande", "commander", "acheter"],
        "Commandez sur notre Marketplace. Livraison dans toutes les régions du Sénégal.",
    ),
    (
        &["livraison", "délai", "transport"],
        "Délais : 24h à 72h selon votre localisation. Express pour Dakar.",
    ),
    (
        &["prix", "coût", "tarif", "montant"],
        "Prix en FCFA. Tarifs dégressifs et facilités de paiement disponibles.",
    ),
    (
        &["paiement", "payer", "facture"],
        "Paiements : Orange Money, Wave, virement, espèces. Facturation automatique.",
    ),
    (
        &["aide", "help", "support", "assistance"],
        "Je vous aide avec commandes, fournisseurs, prix et livraisons. Support : +221 33 XXX XX XX.",
    ),
    (
        &["bonjour", "salut", "hello", "bonsoir"],
        "Bonjour ! Bienvenue sur BTP Connect. Comment puis-je vous aider ?",
    ),
];

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

pub fn respond<R: Rng + ?Sized>(message: &str, rng: &mut R) -> String {
    let text = message.to_lowercase();

    if mentions(&text, STATUS_KEYWORDS) {
        let reply = STATUS_REPLIES.choose(rng).copied().unwrap_or(STATUS_REPLIES[0]);
        return reply.to_string();
    }

    CATEGORIES
        .iter()
        .find(|(keywords, _)| mentions(&text, keywords))
        .map(|(_, reply)| *reply)
        .unwrap_or(DEFAULT_REPLY)
        .to_string()
}
